//! Attachment text extraction.
//!
//! Document attachments are fetched and parsed concurrently. A failure on
//! one attachment is logged and the attachment is forwarded without text.

pub mod layout;
pub mod pdf;

use futures::{StreamExt, future::join_all};
use tracing::{debug, warn};

use crate::models::chat::{Attachment, AttachmentKind};

use layout::render_events;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to fetch attachment: {0}")]
    Fetch(String),

    #[error("attachment fetch returned status {0}")]
    Status(u16),

    #[error("failed to parse document: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    /// Full flattened text, pages separated by a blank line.
    pub text: String,
    /// Leading characters of `text` used for context listings.
    pub preview: String,
    pub pages: usize,
}

/// An attachment of the current turn together with its extraction result.
/// Lives only for the duration of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedAttachment {
    pub attachment: Attachment,
    pub extracted: Option<ExtractedDocument>,
}

impl PreparedAttachment {
    pub fn passthrough(attachment: Attachment) -> Self {
        Self {
            attachment,
            extracted: None,
        }
    }
}

#[derive(Clone)]
pub struct AttachmentExtractor {
    client: reqwest::Client,
    preview_chars: usize,
    /// Downloads larger than this are abandoned before parsing.
    max_bytes: u64,
}

impl AttachmentExtractor {
    pub fn new(client: reqwest::Client, preview_chars: usize, max_bytes: u64) -> Self {
        Self {
            client,
            preview_chars,
            max_bytes,
        }
    }

    /// Extracts every document attachment concurrently. Results keep the
    /// input order and never fail as a whole.
    pub async fn prepare_all(&self, attachments: Vec<Attachment>) -> Vec<PreparedAttachment> {
        join_all(attachments.into_iter().map(|attachment| self.prepare(attachment))).await
    }

    async fn prepare(&self, attachment: Attachment) -> PreparedAttachment {
        if attachment.kind() != AttachmentKind::PaginatedDocument {
            return PreparedAttachment::passthrough(attachment);
        }

        match self.extract(&attachment).await {
            Ok(extracted) => {
                debug!(
                    attachment = %attachment.name,
                    pages = extracted.pages,
                    chars = extracted.text.len(),
                    "extracted document text"
                );
                PreparedAttachment {
                    attachment,
                    extracted: Some(extracted),
                }
            },
            Err(e) => {
                warn!(
                    attachment = %attachment.name,
                    url = %attachment.url,
                    error = %e,
                    "document extraction failed, forwarding without text"
                );
                PreparedAttachment::passthrough(attachment)
            },
        }
    }

    pub async fn extract(&self, attachment: &Attachment) -> Result<ExtractedDocument, ExtractError> {
        let response = self
            .client
            .get(&attachment.url)
            .send()
            .await
            .map_err(|e| ExtractError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Status(status.as_u16()));
        }

        let bytes = self.read_capped(response).await?;

        let preview_chars = self.preview_chars;
        tokio::task::spawn_blocking(move || parse_document(&bytes, preview_chars))
            .await
            .map_err(|e| ExtractError::Parse(e.to_string()))?
    }

    /// Collects the body, giving up as soon as it is known to exceed
    /// `max_bytes`. A declared length is checked first; the running count
    /// covers chunked and mislabelled responses.
    async fn read_capped(&self, response: reqwest::Response) -> Result<Vec<u8>, ExtractError> {
        let too_large = || ExtractError::Fetch(format!("attachment exceeds {} bytes", self.max_bytes));

        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(too_large());
        }

        let mut body = Vec::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| ExtractError::Fetch(e.to_string()))?;
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// CPU-bound half of extraction, run off the async workers.
pub fn parse_document(bytes: &[u8], preview_chars: usize) -> Result<ExtractedDocument, ExtractError> {
    let pages = pdf::extract_page_events(bytes)?;

    let text = pages
        .iter()
        .map(|events| render_events(events))
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(ExtractedDocument {
        preview: text.chars().take(preview_chars).collect(),
        pages: pages.len(),
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::pdf::fixtures::make_pdf;
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn attachment(name: &str, media_type: &str, url: String) -> Attachment {
        Attachment {
            id: format!("file_{name}"),
            name: name.to_string(),
            media_type: media_type.to_string(),
            size: 0,
            url,
            uploadcare_uuid: None,
            cloudinary_public_id: None,
        }
    }

    #[test]
    fn test_preview_is_bounded_and_pages_are_separated() {
        let long = "x".repeat(80);
        let pdf = make_pdf(&[
            &format!("BT /F1 12 Tf 72 700 Td ({long}) Tj ET"),
            "BT /F1 12 Tf 72 700 Td (tail) Tj ET",
        ]);

        let doc = parse_document(&pdf, 50).unwrap();
        assert_eq!(doc.pages, 2);
        assert_eq!(doc.preview.chars().count(), 50);
        assert_eq!(doc.text, format!("{long}\n\ntail"));
    }

    #[tokio::test]
    async fn test_documents_are_extracted_and_others_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/report.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(make_pdf(&["BT /F1 12 Tf 72 700 Td (Quarterly report) Tj ET"])),
            )
            .mount(&server)
            .await;

        let extractor = AttachmentExtractor::new(reqwest::Client::new(), 500, 1 << 20);
        let prepared = extractor
            .prepare_all(vec![
                attachment("report.pdf", "application/pdf", format!("{}/report.pdf", server.uri())),
                attachment("cat.png", "image/png", format!("{}/cat.png", server.uri())),
            ])
            .await;

        assert_eq!(prepared.len(), 2);
        assert_eq!(
            prepared[0].extracted.as_ref().map(|d| d.text.as_str()),
            Some("Quarterly report")
        );
        assert!(prepared[1].extracted.is_none());
    }

    #[tokio::test]
    async fn test_failed_fetch_is_soft() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let extractor = AttachmentExtractor::new(reqwest::Client::new(), 500, 1 << 20);
        let doc = attachment("gone.pdf", "application/pdf", format!("{}/gone.pdf", server.uri()));

        assert!(matches!(extractor.extract(&doc).await, Err(ExtractError::Status(404))));

        let prepared = extractor.prepare_all(vec![doc.clone()]).await;
        assert_eq!(prepared, vec![PreparedAttachment::passthrough(doc)]);
    }

    #[tokio::test]
    async fn test_oversized_download_is_abandoned() {
        let server = MockServer::start().await;
        let pdf = make_pdf(&["BT /F1 12 Tf 72 700 Td (Too big) Tj ET"]);
        let limit = pdf.len() as u64 - 1;
        Mock::given(method("GET"))
            .and(path("/big.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf.clone()))
            .mount(&server)
            .await;

        let capped = AttachmentExtractor::new(reqwest::Client::new(), 500, limit);
        let doc = attachment("big.pdf", "application/pdf", format!("{}/big.pdf", server.uri()));

        match capped.extract(&doc).await {
            Err(ExtractError::Fetch(message)) => {
                assert_eq!(message, format!("attachment exceeds {limit} bytes"));
            },
            other => panic!("expected a size failure, got {other:?}"),
        }
        let prepared = capped.prepare_all(vec![doc.clone()]).await;
        assert_eq!(prepared, vec![PreparedAttachment::passthrough(doc.clone())]);

        let exact = AttachmentExtractor::new(reqwest::Client::new(), 500, pdf.len() as u64);
        assert_eq!(exact.extract(&doc).await.unwrap().text, "Too big");
    }
}
