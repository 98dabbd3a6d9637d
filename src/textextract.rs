//! Document text extraction: PDF text via lopdf, image text via Tesseract.
//!
//! Images are decoded and normalized to PNG before OCR so the engine never
//! sees an exotic container format.

use std::io::Cursor;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Settings;

/// What kind of document the bytes were treated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl DocumentKind {
    /// Dispatch by file extension, the same set the upload form accepts.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "png" | "jpg" | "jpeg" => Some(Self::Image),
            _ => None,
        }
    }
}

/// Text pulled out of one document, tagged with how it was obtained.
#[derive(Debug)]
pub struct DocumentText {
    pub kind: DocumentKind,
    pub text: String,
}

/// Extract raw text from a supported document.
///
/// Returns `Ok` with possibly-empty text (scanned PDFs without a text layer,
/// blank images); the caller decides whether empty text is worth a vision
/// fallback. Errors mean the bytes could not be processed at all.
pub async fn extract_text(filename: &str, data: &[u8], settings: &Settings) -> Result<DocumentText> {
    let kind = DocumentKind::from_filename(filename)
        .with_context(|| format!("Unsupported file type: {}", filename))?;

    let text = match kind {
        DocumentKind::Pdf => extract_pdf_text(data)?,
        DocumentKind::Image => ocr_image(data, &settings.ocr_languages).await?,
    };

    debug!("Extracted {} chars from {} ({:?})", text.len(), filename, kind);
    Ok(DocumentText { kind, text })
}

/// Extract text from a PDF file using lopdf.
pub fn extract_pdf_text(data: &[u8]) -> Result<String> {
    use lopdf::Document;

    let doc = Document::load_from(Cursor::new(data))
        .map_err(|e| anyhow::anyhow!("Failed to load PDF: {}", e))?;

    let mut text = String::new();
    let pages = doc.get_pages();

    for (page_num, _) in pages {
        if let Ok(content) = doc.extract_text(&[page_num]) {
            text.push_str(&content);
            text.push('\n');
        }
    }

    Ok(text)
}

/// Run Tesseract over an image.
///
/// The image is decoded, re-encoded as PNG into a temp file, and the
/// `tesseract` binary is invoked with stdout output. The temp file is removed
/// regardless of outcome.
async fn ocr_image(data: &[u8], languages: &str) -> Result<String> {
    let img = image::load_from_memory(data).context("Failed to decode image")?;

    let temp_path = temp_png_path();
    img.save(&temp_path)
        .with_context(|| format!("Failed to stage image at {:?}", temp_path))?;

    let output = tokio::process::Command::new("tesseract")
        .arg(&temp_path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .output()
        .await;

    if let Err(e) = std::fs::remove_file(&temp_path) {
        warn!("Could not remove temp image {:?}: {}", temp_path, e);
    }

    let output = output.context("Failed to spawn tesseract (is it installed?)")?;
    if !output.status.success() {
        anyhow::bail!(
            "tesseract exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn temp_png_path() -> PathBuf {
    std::env::temp_dir().join(format!("ocr_{}.png", Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_dispatch() {
        assert_eq!(DocumentKind::from_filename("pedido.pdf"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_filename("PEDIDO.PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_filename("scan.jpeg"), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::from_filename("foto.PNG"), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::from_filename("planilha.xlsx"), None);
        assert_eq!(DocumentKind::from_filename("sem_extensao"), None);
    }

    #[test]
    fn garbage_pdf_bytes_fail() {
        assert!(extract_pdf_text(b"not a pdf at all").is_err());
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let settings = Settings::from_env();
        let err = extract_text("dados.docx", b"irrelevant", &settings)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported file type"));
    }
}
