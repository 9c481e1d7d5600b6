//! Text extraction from PDF content streams with lopdf.
//!
//! Show-text operators are turned into positioned fragments by tracking the
//! text matrix, then handed to [`layout`](super::layout) for line and table
//! reconstruction.

use lopdf::{Document, Object, content::Content};
use tracing::debug;

use super::ExtractError;
use super::layout::{PageEvent, TextFragment, page_events};

/// Average glyph width as a fraction of the font size.
const GLYPH_WIDTH_RATIO: f64 = 0.5;

/// TJ adjustments (thousandths of an em) at or below this are word or column
/// gaps rather than kerning.
const TJ_GAP_THRESHOLD: f64 = -200.0;

/// Parses every page of the document into layout events, in page order.
pub fn extract_page_events(bytes: &[u8]) -> Result<Vec<Vec<PageEvent>>, ExtractError> {
    let doc = Document::load_mem(bytes).map_err(|e| ExtractError::Parse(e.to_string()))?;
    let mut pages = Vec::new();

    for (number, page_id) in doc.get_pages() {
        let raw = doc
            .get_page_content(page_id)
            .map_err(|e| ExtractError::Parse(format!("page {number}: {e}")))?;
        let content =
            Content::decode(&raw).map_err(|e| ExtractError::Parse(format!("page {number}: {e}")))?;

        let fragments = fragments_from_operations(&content);
        debug!(page = number, fragments = fragments.len(), "decoded page");
        pages.push(page_events(&fragments));
    }

    Ok(pages)
}

#[derive(Debug, Default)]
struct TextState {
    x: f64,
    y: f64,
    line_x: f64,
    line_y: f64,
    leading: f64,
    font_size: f64,
}

impl TextState {
    fn begin(&mut self) {
        self.x = 0.0;
        self.y = 0.0;
        self.line_x = 0.0;
        self.line_y = 0.0;
    }

    fn move_line(&mut self, tx: f64, ty: f64) {
        self.line_x += tx;
        self.line_y += ty;
        self.x = self.line_x;
        self.y = self.line_y;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    fn size(&self) -> f64 {
        if self.font_size > 0.0 { self.font_size } else { 12.0 }
    }

    fn show(&mut self, text: String, out: &mut Vec<TextFragment>) {
        let width = text.chars().count() as f64 * self.size() * GLYPH_WIDTH_RATIO;
        out.push(TextFragment {
            x: self.x,
            y: self.y,
            width,
            text,
        });
        self.x += width;
    }
}

fn fragments_from_operations(content: &Content) -> Vec<TextFragment> {
    let mut state = TextState::default();
    let mut fragments = Vec::new();

    for op in &content.operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "BT" => state.begin(),
            "Td" => {
                if let (Some(tx), Some(ty)) = (number(operands, 0), number(operands, 1)) {
                    state.move_line(tx, ty);
                }
            },
            "TD" => {
                if let (Some(tx), Some(ty)) = (number(operands, 0), number(operands, 1)) {
                    state.leading = -ty;
                    state.move_line(tx, ty);
                }
            },
            "Tm" => {
                if let (Some(e), Some(f)) = (number(operands, 4), number(operands, 5)) {
                    state.line_x = e;
                    state.line_y = f;
                    state.x = e;
                    state.y = f;
                }
            },
            "TL" => {
                if let Some(leading) = number(operands, 0) {
                    state.leading = leading;
                }
            },
            "Tf" => {
                if let Some(size) = number(operands, 1) {
                    state.font_size = size.abs();
                }
            },
            "T*" => state.next_line(),
            "Tj" => {
                if let Some(text) = operands.first().and_then(decode_string) {
                    state.show(text, &mut fragments);
                }
            },
            "'" => {
                state.next_line();
                if let Some(text) = operands.first().and_then(decode_string) {
                    state.show(text, &mut fragments);
                }
            },
            "\"" => {
                state.next_line();
                if let Some(text) = operands.get(2).and_then(decode_string) {
                    state.show(text, &mut fragments);
                }
            },
            "TJ" => {
                let Some(Object::Array(items)) = operands.first() else {
                    continue;
                };
                for item in items {
                    if let Some(text) = decode_string(item) {
                        state.show(text, &mut fragments);
                    } else if let Some(adjust) = as_number(item)
                        && adjust <= TJ_GAP_THRESHOLD
                    {
                        state.x += -adjust / 1000.0 * state.size();
                    }
                }
            },
            _ => {},
        }
    }

    fragments
}

fn as_number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(*value as f64),
        _ => None,
    }
}

fn number(operands: &[Object], index: usize) -> Option<f64> {
    operands.get(index).and_then(as_number)
}

/// UTF-16BE when the string carries a byte-order mark, Latin-1 otherwise.
fn decode_string(object: &Object) -> Option<String> {
    let Object::String(bytes, _) = object else {
        return None;
    };

    if let [0xFE, 0xFF, rest @ ..] = bytes.as_slice() {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return Some(String::from_utf16_lossy(&units));
    }

    Some(bytes.iter().map(|&b| b as char).collect())
}
