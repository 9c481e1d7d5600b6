//! Prompt assembly for one conversational turn.
//!
//! The assembler is a pure function of the history, the prepared
//! attachments, the recalled memories and its limits: no clock, no I/O.

use crate::core::extraction::PreparedAttachment;
use crate::models::{
    chat::{AttachmentKind, IncomingMessage, Role},
    memory::MemoryRecord,
    prompt::{Capability, PromptMessage, PromptPart},
};

/// Rough per-image cost used by the token estimate.
const IMAGE_TOKEN_ESTIMATE: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct ContextLimits {
    pub recent_user_turns: usize,
    pub max_document_chars: usize,
    pub max_context_tokens: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub messages: Vec<PromptMessage>,
    pub capability: Capability,
    /// The textual context block, when one was produced.
    pub block: Option<String>,
}

pub struct ContextAssembler {
    limits: ContextLimits,
}

impl ContextAssembler {
    pub fn new(limits: ContextLimits) -> Self {
        Self { limits }
    }

    pub fn assemble(
        &self,
        history: &[IncomingMessage],
        attachments: &[PreparedAttachment],
        memories: &[MemoryRecord],
    ) -> AssembledContext {
        let capability = capability_for(attachments);
        let mut messages: Vec<PromptMessage> = history
            .iter()
            .map(|m| PromptMessage::text(m.role, m.content.clone()))
            .collect();

        let block = self.context_block(history, attachments, memories);
        let has_documents = attachments
            .iter()
            .any(|a| a.attachment.kind() == AttachmentKind::PaginatedDocument);
        let last_user = messages.iter().rposition(|m| m.role == Role::User);

        if let Some(block) = &block {
            match last_user {
                Some(index) if !has_documents && index == messages.len() - 1 => {
                    messages[index].append_text(&format!("\n\n{block}"));
                },
                _ => {
                    let mut system = block.clone();
                    if let Some(documents) = self.document_text(attachments) {
                        system.push_str("\n\n");
                        system.push_str(&documents);
                    }
                    messages.push(PromptMessage::text(Role::System, system));
                },
            }
        }

        if capability == Capability::Vision
            && let Some(index) = last_user
        {
            for prepared in attachments {
                if prepared.attachment.kind() == AttachmentKind::Image {
                    messages[index].parts.push(PromptPart::ImageUrl {
                        url: prepared.attachment.url.clone(),
                        media_type: prepared.attachment.media_type.clone(),
                    });
                }
            }
        }

        AssembledContext {
            messages: trim_to_budget(messages, self.limits.max_context_tokens),
            capability,
            block,
        }
    }

    fn context_block(
        &self,
        history: &[IncomingMessage],
        attachments: &[PreparedAttachment],
        memories: &[MemoryRecord],
    ) -> Option<String> {
        let mut sections = Vec::new();

        let recent: Vec<String> = history
            .iter()
            .rev()
            .filter(|m| m.role == Role::User && !m.content.trim().is_empty())
            .take(self.limits.recent_user_turns)
            .map(|m| format!("- {}", collapse_whitespace(&m.content)))
            .collect();
        if !recent.is_empty() {
            sections.push(format!("Recent user messages:\n{}", recent.join("\n")));
        }

        let documents: Vec<String> = attachments
            .iter()
            .filter(|a| a.attachment.kind() == AttachmentKind::PaginatedDocument)
            .map(|a| {
                let header = format!("- {} ({})", a.attachment.name, a.attachment.media_type);
                match &a.extracted {
                    Some(doc) if !doc.preview.is_empty() => {
                        format!("{header}: {}", collapse_whitespace(&doc.preview))
                    },
                    _ => header,
                }
            })
            .collect();
        if !documents.is_empty() {
            sections.push(format!("Attached documents:\n{}", documents.join("\n")));
        }

        let others: Vec<String> = attachments
            .iter()
            .filter(|a| a.attachment.kind() == AttachmentKind::Other)
            .map(|a| format!("- {} ({})", a.attachment.name, a.attachment.media_type))
            .collect();
        if !others.is_empty() {
            sections.push(format!("Attached files:\n{}", others.join("\n")));
        }

        let recalled: Vec<String> = memories
            .iter()
            .filter(|m| !m.memory.trim().is_empty())
            .map(|m| format!("- {}", m.memory.trim()))
            .collect();
        if !recalled.is_empty() {
            sections.push(format!(
                "Relevant context from previous conversations:\n{}",
                recalled.join("\n")
            ));
        }

        (!sections.is_empty()).then(|| sections.join("\n\n"))
    }

    /// Full text of the extracted documents, bounded in total length.
    fn document_text(&self, attachments: &[PreparedAttachment]) -> Option<String> {
        let mut remaining = self.limits.max_document_chars;
        let mut out = Vec::new();

        for prepared in attachments {
            let Some(doc) = &prepared.extracted else {
                continue;
            };
            if remaining == 0 {
                break;
            }

            let body: String = doc.text.chars().take(remaining).collect();
            remaining -= body.chars().count();
            out.push(format!("### {}\n{}", prepared.attachment.name, body));
        }

        (!out.is_empty()).then(|| format!("Document contents:\n\n{}", out.join("\n\n")))
    }
}

/// `Vision` as soon as one attachment is an image.
pub fn capability_for(attachments: &[PreparedAttachment]) -> Capability {
    if attachments
        .iter()
        .any(|a| a.attachment.kind() == AttachmentKind::Image)
    {
        Capability::Vision
    } else {
        Capability::Text
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn estimate_tokens(message: &PromptMessage) -> usize {
    message
        .parts
        .iter()
        .map(|part| match part {
            PromptPart::Text(text) => text.len() / 4,
            PromptPart::ImageUrl { .. } => IMAGE_TOKEN_ESTIMATE,
        })
        .sum()
}

/// Drops the oldest non-system messages until the estimate fits. System
/// entries and the newest message are always kept; order is preserved.
fn trim_to_budget(messages: Vec<PromptMessage>, max_tokens: usize) -> Vec<PromptMessage> {
    let mut total: usize = messages.iter().map(estimate_tokens).sum();
    if total <= max_tokens {
        return messages;
    }

    let newest = messages.iter().rposition(|m| m.role != Role::System);
    let mut keep = vec![true; messages.len()];

    for (index, message) in messages.iter().enumerate() {
        if total <= max_tokens {
            break;
        }
        if message.role == Role::System || Some(index) == newest {
            continue;
        }
        keep[index] = false;
        total -= estimate_tokens(message);
    }

    messages
        .into_iter()
        .zip(keep)
        .filter_map(|(message, keep)| keep.then_some(message))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extraction::ExtractedDocument;
    use crate::models::chat::Attachment;

    fn limits() -> ContextLimits {
        ContextLimits {
            recent_user_turns: 3,
            max_document_chars: 40,
            max_context_tokens: 100_000,
        }
    }

    fn msg(role: Role, content: &str) -> IncomingMessage {
        IncomingMessage {
            id: None,
            role,
            content: content.to_string(),
        }
    }

    fn prepared(name: &str, media_type: &str, text: Option<&str>) -> PreparedAttachment {
        PreparedAttachment {
            attachment: Attachment {
                id: name.to_string(),
                name: name.to_string(),
                media_type: media_type.to_string(),
                size: 1,
                url: format!("https://cdn.test/{name}"),
                uploadcare_uuid: None,
                cloudinary_public_id: None,
            },
            extracted: text.map(|t| ExtractedDocument {
                text: t.to_string(),
                preview: t.chars().take(10).collect(),
                pages: 1,
            }),
        }
    }

    fn memory(text: &str) -> MemoryRecord {
        MemoryRecord {
            id: "m1".into(),
            memory: text.into(),
            user_id: None,
            score: Some(0.9),
            metadata: None,
        }
    }

    #[test]
    fn test_only_last_three_user_turns_most_recent_first() {
        let history = vec![
            msg(Role::User, "one"),
            msg(Role::Assistant, "r1"),
            msg(Role::User, "two"),
            msg(Role::User, "three"),
            msg(Role::Assistant, "r2"),
            msg(Role::User, "four\nlines"),
        ];

        let out = ContextAssembler::new(limits()).assemble(&history, &[], &[]);
        let block = out.block.unwrap();

        assert!(block.starts_with("Recent user messages:\n- four lines\n- three\n- two"));
        assert!(!block.contains("- one"));
    }

    #[test]
    fn test_block_is_appended_to_last_user_turn_without_documents() {
        let history = vec![msg(Role::User, "hello")];
        let out =
            ContextAssembler::new(limits()).assemble(&history, &[], &[memory("likes tea")]);

        assert_eq!(out.messages.len(), 1);
        let text = out.messages[0].text_content();
        assert!(text.starts_with("hello\n\nRecent user messages:"));
        assert!(text.ends_with("Relevant context from previous conversations:\n- likes tea"));
    }

    #[test]
    fn test_documents_produce_separate_bounded_system_entry() {
        let history = vec![msg(Role::User, "summarize")];
        let long = "a".repeat(100);
        let attachments = vec![prepared("report.pdf", "application/pdf", Some(&long))];

        let out = ContextAssembler::new(limits()).assemble(&history, &attachments, &[]);

        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].text_content(), "summarize");
        let system = &out.messages[1];
        assert_eq!(system.role, Role::System);
        let text = system.text_content();
        assert!(text.contains("- report.pdf (application/pdf): aaaaaaaaaa"));
        assert!(text.contains(&format!("### report.pdf\n{}", "a".repeat(40))));
        assert!(!text.contains(&"a".repeat(41)));
    }

    #[test]
    fn test_failed_document_is_listed_without_preview() {
        let history = vec![msg(Role::User, "read this")];
        let attachments = vec![prepared("broken.pdf", "application/pdf", None)];

        let out = ContextAssembler::new(limits()).assemble(&history, &attachments, &[]);
        let block = out.block.unwrap();

        assert!(block.contains("Attached documents:\n- broken.pdf (application/pdf)"));
        assert_eq!(out.capability, Capability::Text);
    }

    #[test]
    fn test_images_select_vision_and_stay_out_of_block() {
        let history = vec![msg(Role::User, "what is this")];
        let attachments = vec![
            prepared("cat.png", "image/png", None),
            prepared("notes.txt", "text/plain", None),
        ];

        let out = ContextAssembler::new(limits()).assemble(&history, &attachments, &[]);

        assert_eq!(out.capability, Capability::Vision);
        let block = out.block.unwrap();
        assert!(!block.contains("cat.png"));
        assert!(block.contains("Attached files:\n- notes.txt (text/plain)"));
        assert!(out.messages[0].has_images());
    }

    #[test]
    fn test_no_attachments_means_text() {
        assert_eq!(capability_for(&[]), Capability::Text);
        let docs = vec![prepared("a.pdf", "application/pdf", Some("x"))];
        assert_eq!(capability_for(&docs), Capability::Text);
    }

    #[test]
    fn test_budget_drops_oldest_turns_first() {
        let filler = "x".repeat(400);
        let history = vec![
            msg(Role::User, &filler),
            msg(Role::Assistant, &filler),
            msg(Role::User, "latest"),
        ];
        let tight = ContextLimits {
            max_context_tokens: 220,
            ..limits()
        };

        let out = ContextAssembler::new(tight).assemble(&history, &[], &[]);

        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, Role::Assistant);
        assert!(out.messages[1].text_content().starts_with("latest"));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let history = vec![msg(Role::User, "a"), msg(Role::User, "b")];
        let attachments = vec![prepared("r.pdf", "application/pdf", Some("text"))];
        let assembler = ContextAssembler::new(limits());

        assert_eq!(
            assembler.assemble(&history, &attachments, &[memory("m")]),
            assembler.assemble(&history, &attachments, &[memory("m")])
        );
    }
}
