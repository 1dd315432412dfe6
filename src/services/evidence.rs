//! Evidence file storage
//!
//! Uploaded task evidence lives as plain files in one directory. Stored names
//! are 32 random hex characters plus the extension of the uploaded file.

use bytes::Bytes;
use rand::RngCore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::types::{ConvenioError, Result};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A file received in a multipart request
#[derive(Debug, Clone)]
pub struct EvidenceUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl EvidenceUpload {
    /// Accept only PDF uploads
    pub fn new(filename: Option<String>, content_type: Option<String>, data: Bytes) -> Result<Self> {
        let filename = filename.unwrap_or_default();
        let is_pdf = match content_type.as_deref() {
            Some(ct) => ct.eq_ignore_ascii_case(PDF_CONTENT_TYPE),
            None => extension_of(&filename).is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")),
        };

        if !is_pdf {
            return Err(ConvenioError::BadRequest("Only PDF files are allowed".into()));
        }
        if data.is_empty() {
            return Err(ConvenioError::BadRequest("Uploaded file is empty".into()));
        }

        Ok(Self {
            filename,
            content_type,
            data,
        })
    }
}

/// Directory-backed evidence store
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    dir: PathBuf,
}

impl EvidenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write an upload and return its stored filename
    pub async fn save(&self, upload: &EvidenceUpload) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        let extension = extension_of(&upload.filename)
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "pdf".to_string());
        let stored = format!("{}.{}", hex::encode(raw), extension);

        tokio::fs::write(self.dir.join(&stored), &upload.data).await?;

        debug!(file = %stored, bytes = upload.data.len(), "Stored evidence");
        Ok(stored)
    }

    /// Read a stored file by name
    pub async fn load(&self, name: &str) -> Result<Bytes> {
        let not_found = || ConvenioError::NotFound(format!("Evidence file {name} not found"));

        if !is_safe_name(name) {
            return Err(not_found());
        }

        match tokio::fs::read(self.dir.join(name)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a replaced file; failures are only logged
    pub async fn remove(&self, name: &str) {
        if !is_safe_name(name) {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(self.dir.join(name)).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(file = %name, error = %e, "Failed to remove replaced evidence");
            }
        }
    }
}

fn extension_of(filename: &str) -> Option<&str> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// Plain file names only: no separators, no parent references
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Content type used when serving a stored file
pub fn content_type_for(name: &str) -> &'static str {
    match extension_of(name).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("pdf") => PDF_CONTENT_TYPE,
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf(name: &str) -> EvidenceUpload {
        EvidenceUpload::new(
            Some(name.into()),
            Some(PDF_CONTENT_TYPE.into()),
            Bytes::from_static(b"%PDF-1.4 test"),
        )
        .unwrap()
    }

    #[test]
    fn test_only_pdf_accepted() {
        let err = EvidenceUpload::new(
            Some("foto.png".into()),
            Some("image/png".into()),
            Bytes::from_static(b"png"),
        )
        .unwrap_err();
        assert!(matches!(err, ConvenioError::BadRequest(_)));

        assert!(EvidenceUpload::new(Some("acta.PDF".into()), None, Bytes::from_static(b"x")).is_ok());
        assert!(EvidenceUpload::new(Some("acta".into()), None, Bytes::from_static(b"x")).is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(dir.path().join("evidencias"));

        let name = store.save(&pdf("Acta Reunión.pdf")).await.unwrap();
        assert_eq!(name.len(), 32 + ".pdf".len());
        assert!(name.ends_with(".pdf"));

        let data = store.load(&name).await.unwrap();
        assert_eq!(&data[..], b"%PDF-1.4 test");
        assert_eq!(content_type_for(&name), PDF_CONTENT_TYPE);

        store.remove(&name).await;
        assert!(matches!(store.load(&name).await.unwrap_err(), ConvenioError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_traversal_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());

        for name in ["../secret.pdf", "..", "a/b.pdf", ""] {
            assert!(matches!(
                store.load(name).await.unwrap_err(),
                ConvenioError::NotFound(_)
            ));
        }
    }
}
