// Resume document assembly: render → scoped temp file → upload → signed link.

pub mod docx;
pub mod storage;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::info;

pub use storage::{BlobStore, S3BlobStore, StorageError};

/// Used when the extracted name sanitizes down to nothing.
const FALLBACK_NAME: &str = "Candidate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledDocument {
    /// Also the object key in the bucket.
    pub file_name: String,
    pub signed_url: String,
}

pub struct DocumentAssembler {
    store: Arc<dyn BlobStore>,
    url_ttl: Duration,
}

impl DocumentAssembler {
    pub fn new(store: Arc<dyn BlobStore>, url_ttl: Duration) -> Self {
        Self { store, url_ttl }
    }

    /// Renders `content` to a `.docx`, uploads it and returns a signed link.
    ///
    /// The local file is a `NamedTempFile`: it is removed when this function
    /// returns, on the error paths included.
    pub async fn assemble(
        &self,
        user_name: &str,
        content: &str,
        date: NaiveDate,
    ) -> Result<AssembledDocument, StorageError> {
        let file_name = resume_file_name(user_name, date);
        let rendered = docx::render(content)?;

        let mut file = tempfile::Builder::new()
            .prefix("resume-")
            .suffix(".docx")
            .tempfile()?;
        file.write_all(&rendered)?;
        file.flush()?;

        self.store
            .upload_file(&file_name, file.path(), docx::DOCX_CONTENT_TYPE)
            .await?;
        let signed_url = self.store.presign_get(&file_name, self.url_ttl).await?;

        info!(
            "Assembled {file_name} ({} bytes), link valid for {}s",
            rendered.len(),
            self.url_ttl.as_secs()
        );

        Ok(AssembledDocument {
            file_name,
            signed_url,
        })
    }
}

/// `"<name> Resume <YYYY-MM-DD>.docx"`. Path separators and control characters
/// are dropped from the name since it doubles as an object key.
pub fn resume_file_name(user_name: &str, date: NaiveDate) -> String {
    let cleaned: String = user_name
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '/' | '\\'))
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let name = if cleaned.is_empty() {
        FALLBACK_NAME
    } else {
        cleaned.as_str()
    };
    format!("{name} Resume {}.docx", date.format("%Y-%m-%d"))
}
