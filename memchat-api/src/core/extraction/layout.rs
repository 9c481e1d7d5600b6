//! Positional layout analysis for extracted page text.
//!
//! Fragments are grouped into lines by baseline, lines into cells by
//! horizontal gaps, and runs of multi-cell lines become tables whose columns
//! are inferred from clusters of cell start positions.

/// Baselines closer than this belong to the same line.
const LINE_TOLERANCE: f64 = 3.0;

/// Horizontal gap (text space units) that separates two cells on one line.
const CELL_GAP: f64 = 8.0;

/// Cell starts closer than this fall into the same column.
const COLUMN_TOLERANCE: f64 = 20.0;

/// Minimum consecutive multi-cell lines that make a table.
const MIN_TABLE_ROWS: usize = 2;

/// A positioned run of text as emitted by a show-text operator.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Text(String),
    Table(Vec<Vec<String>>),
}

#[derive(Debug, Clone)]
struct Cell {
    x: f64,
    end: f64,
    text: String,
}

/// Turns one page's fragments into reading-order text and table events.
pub fn page_events(fragments: &[TextFragment]) -> Vec<PageEvent> {
    let lines: Vec<Vec<Cell>> = group_lines(fragments)
        .into_iter()
        .map(|line| split_cells(&line))
        .filter(|cells| !cells.is_empty())
        .collect();

    let mut events = Vec::new();
    let mut text_run: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let run_end = (i..lines.len())
            .find(|&j| lines[j].len() < 2)
            .unwrap_or(lines.len());

        if run_end - i >= MIN_TABLE_ROWS {
            if !text_run.is_empty() {
                events.push(PageEvent::Text(text_run.join("\n")));
                text_run.clear();
            }
            events.push(PageEvent::Table(build_table(&lines[i..run_end])));
            i = run_end;
            continue;
        }

        let line_text = lines[i]
            .iter()
            .map(|cell| cell.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        text_run.push(line_text);
        i += 1;
    }

    if !text_run.is_empty() {
        events.push(PageEvent::Text(text_run.join("\n")));
    }

    events
}

/// Renders events as plain text, tables as pipe-delimited rows.
pub fn render_events(events: &[PageEvent]) -> String {
    events
        .iter()
        .map(|event| match event {
            PageEvent::Text(text) => text.clone(),
            PageEvent::Table(rows) => rows
                .iter()
                .map(|row| row.join(" | "))
                .collect::<Vec<_>>()
                .join("\n"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Top of page first. PDF y grows upwards.
fn group_lines(fragments: &[TextFragment]) -> Vec<Vec<TextFragment>> {
    let mut sorted: Vec<&TextFragment> = fragments
        .iter()
        .filter(|f| !f.text.trim().is_empty())
        .collect();
    sorted.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

    let mut lines: Vec<(f64, Vec<TextFragment>)> = Vec::new();
    for fragment in sorted {
        match lines.last_mut() {
            Some((baseline, line)) if (*baseline - fragment.y).abs() <= LINE_TOLERANCE => {
                line.push(fragment.clone());
            },
            _ => lines.push((fragment.y, vec![fragment.clone()])),
        }
    }

    lines
        .into_iter()
        .map(|(_, mut line)| {
            line.sort_by(|a, b| a.x.total_cmp(&b.x));
            line
        })
        .collect()
}

fn split_cells(line: &[TextFragment]) -> Vec<Cell> {
    let mut cells: Vec<Cell> = Vec::new();

    for fragment in line {
        let text = fragment.text.trim();
        match cells.last_mut() {
            Some(cell) if fragment.x - cell.end < CELL_GAP => {
                if fragment.x - cell.end > 0.5 || fragment.text.starts_with(' ') {
                    cell.text.push(' ');
                }
                cell.text.push_str(text);
                cell.end = cell.end.max(fragment.x + fragment.width);
            },
            _ => cells.push(Cell {
                x: fragment.x,
                end: fragment.x + fragment.width,
                text: text.to_string(),
            }),
        }
    }

    cells
}

fn build_table(rows: &[Vec<Cell>]) -> Vec<Vec<String>> {
    let mut starts: Vec<f64> = rows.iter().flatten().map(|cell| cell.x).collect();
    starts.sort_by(f64::total_cmp);

    // Each column is represented by the leftmost start in its cluster.
    let mut columns: Vec<(f64, f64)> = Vec::new();
    for x in starts {
        match columns.last_mut() {
            Some((_, last)) if x - *last <= COLUMN_TOLERANCE => *last = x,
            _ => columns.push((x, x)),
        }
    }

    rows.iter()
        .map(|row| {
            let mut out = vec![String::new(); columns.len()];
            for cell in row {
                let column = columns
                    .iter()
                    .position(|&(first, last)| cell.x >= first && cell.x <= last)
                    .unwrap_or(columns.len().saturating_sub(1));
                if !out[column].is_empty() {
                    out[column].push(' ');
                }
                out[column].push_str(&cell.text);
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(x: f64, y: f64, text: &str) -> TextFragment {
        TextFragment {
            x,
            y,
            width: text.chars().count() as f64 * 5.0,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_prose_lines_are_joined_in_reading_order() {
        let events = page_events(&[
            frag(72.0, 680.0, "second line"),
            frag(72.0, 700.0, "first line"),
        ]);

        assert_eq!(events, vec![PageEvent::Text("first line\nsecond line".into())]);
    }

    #[test]
    fn test_adjacent_fragments_merge_into_one_cell() {
        let events = page_events(&[frag(72.0, 700.0, "Hello"), frag(98.0, 700.5, "world")]);

        assert_eq!(events, vec![PageEvent::Text("Hello world".into())]);
    }

    #[test]
    fn test_aligned_rows_become_pipe_table() {
        let fragments = vec![
            frag(72.0, 700.0, "Test"),
            frag(200.0, 700.0, "Value"),
            frag(320.0, 700.0, "Unit"),
            frag(72.0, 686.0, "Glucose"),
            frag(205.0, 686.0, "5.4"),
            frag(318.0, 686.0, "mmol/L"),
            frag(72.0, 660.0, "Notes follow here"),
        ];

        let events = page_events(&fragments);
        assert_eq!(events.len(), 2);
        assert_eq!(
            render_events(&events),
            "Test | Value | Unit\nGlucose | 5.4 | mmol/L\nNotes follow here"
        );
    }

    #[test]
    fn test_missing_cells_keep_column_positions() {
        let fragments = vec![
            frag(72.0, 700.0, "Name"),
            frag(200.0, 700.0, "Dose"),
            frag(320.0, 700.0, "Time"),
            frag(72.0, 686.0, "Aspirin"),
            frag(320.0, 686.0, "08:00"),
        ];

        let events = page_events(&fragments);
        match &events[0] {
            PageEvent::Table(rows) => {
                assert_eq!(rows[1], vec!["Aspirin".to_string(), String::new(), "08:00".to_string()]);
            },
            other => panic!("expected table, got {other:?}"),
        }
    }

    #[test]
    fn test_single_multi_cell_line_is_not_a_table() {
        let events = page_events(&[frag(72.0, 700.0, "Left"), frag(300.0, 700.0, "Right")]);
        assert_eq!(events, vec![PageEvent::Text("Left Right".into())]);
    }
}
