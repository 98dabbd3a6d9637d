//! Extraction orchestrator: runs each uploaded file through text extraction
//! and the AI client, isolating per-file failures, then hands the collected
//! results to the consolidation engine.
//!
//! Files are processed sequentially in upload order. A provider auth/credit
//! failure aborts the batch immediately: the same key fails for every
//! remaining file, so continuing would waste calls and time.

use tracing::{info, warn};

use crate::config::Settings;
use crate::consolidate::{consolidate, FileResult};
use crate::error::{FailureKind, FileFailure};
use crate::provider::{extract_products, ChatModel, DocumentInput, ProviderError};
use crate::schema::{ConsolidationResult, ProductRecord};
use crate::textextract::{extract_text, DocumentKind};

/// One file from the upload form.
pub struct UploadedFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// Result of processing a whole batch.
pub enum BatchOutcome {
    Completed(ConsolidationResult),
    /// Batch-fatal auth/credit failure; no result is published.
    AuthFailed { file: String, message: String },
}

/// Process an upload batch against one provider client.
pub async fn process_batch(
    files: Vec<UploadedFile>,
    client: &dyn ChatModel,
    settings: &Settings,
) -> BatchOutcome {
    let mut results = Vec::with_capacity(files.len());

    for file in &files {
        let result = process_file(file, client, settings).await;

        if let FileResult::Failed(failure) = &result {
            if failure.error.is_batch_fatal() {
                warn!("Batch aborted by {} on {}", failure.error, failure.file);
                return BatchOutcome::AuthFailed {
                    file: failure.file.clone(),
                    message: failure.message.clone(),
                };
            }
        }

        results.push(result);
    }

    let consolidated = consolidate(results);
    info!(
        "Batch complete: {} products from {} file(s), {} failed",
        consolidated.total_products,
        consolidated.processing_info.processed_files,
        consolidated.processing_info.failed_files.len()
    );
    BatchOutcome::Completed(consolidated)
}

/// Run one file through the pipeline, capturing success or a typed failure.
async fn process_file(
    file: &UploadedFile,
    client: &dyn ChatModel,
    settings: &Settings,
) -> FileResult {
    let input = match prepare_input(file, settings).await {
        Ok(input) => input,
        Err(failure) => return FileResult::Failed(failure),
    };

    let raw_products = match call_with_retry(client, &input, &file.name).await {
        Ok(products) => products,
        Err(failure) => return FileResult::Failed(failure),
    };

    let mut products: Vec<ProductRecord> = Vec::with_capacity(raw_products.len());
    let mut skipped = 0;
    for raw in raw_products {
        match raw.into_record(&file.name) {
            Some(record) => products.push(record),
            None => skipped += 1,
        }
    }

    info!(
        "{}: extracted {} product(s), skipped {}",
        file.name,
        products.len(),
        skipped
    );

    FileResult::Extracted {
        source_file: file.name.clone(),
        products,
        skipped,
    }
}

/// Validate a file and turn it into provider input.
async fn prepare_input(
    file: &UploadedFile,
    settings: &Settings,
) -> Result<DocumentInput, FileFailure> {
    if file.data.len() > settings.max_file_size {
        return Err(FileFailure::new(
            &file.name,
            FailureKind::FileTooLarge,
            format!(
                "{} bytes exceeds the {} byte limit",
                file.data.len(),
                settings.max_file_size
            ),
        ));
    }

    if DocumentKind::from_filename(&file.name).is_none() {
        return Err(FileFailure::new(
            &file.name,
            FailureKind::UnsupportedFormat,
            "supported formats: pdf, png, jpg, jpeg",
        ));
    }

    let extracted = match extract_text(&file.name, &file.data, settings).await {
        Ok(extracted) => extracted,
        Err(e) => {
            return Err(FileFailure::new(
                &file.name,
                FailureKind::OcrFailure,
                e.to_string(),
            ))
        }
    };

    if !extracted.text.trim().is_empty() {
        return Ok(DocumentInput::Text(extracted.text));
    }

    // A blank OCR pass on an image still has a chance with a vision-capable
    // model; a PDF without a text layer does not.
    match extracted.kind {
        DocumentKind::Image => Ok(DocumentInput::Image(file.data.clone())),
        DocumentKind::Pdf => Err(FileFailure::new(
            &file.name,
            FailureKind::OcrFailure,
            "no extractable text in document",
        )),
    }
}

/// Call the provider, retrying exactly once when the response fails JSON
/// parsing. Generative responses carry transient formatting noise often
/// enough to warrant one retry; unbounded retries risk cost blowup.
async fn call_with_retry(
    client: &dyn ChatModel,
    input: &DocumentInput,
    file_name: &str,
) -> Result<Vec<crate::schema::RawProduct>, FileFailure> {
    match extract_products(client, input).await {
        Ok(products) => Ok(products),
        Err(ProviderError::Parse(first)) => {
            warn!("{}: response parse failed, retrying once: {}", file_name, first);
            extract_products(client, input)
                .await
                .map_err(|e| classify(file_name, e))
        }
        Err(e) => Err(classify(file_name, e)),
    }
}

fn classify(file_name: &str, error: ProviderError) -> FileFailure {
    let kind = match &error {
        ProviderError::Auth(_) => FailureKind::ProviderAuthError,
        ProviderError::Timeout => FailureKind::ProviderTimeout,
        ProviderError::Parse(_) | ProviderError::Api { .. } | ProviderError::Transport(_) => {
            FailureKind::ProviderResponseInvalid
        }
    };
    FileFailure::new(file_name, kind, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted backend: pops one canned reply per call.
    struct ScriptedModel {
        calls: AtomicUsize,
        replies: Mutex<Vec<Result<String, ProviderError>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                replies: Mutex::new(replies),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _messages: &[crate::provider::Message]) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(ProviderError::Transport("script exhausted".to_string()));
            }
            replies.remove(0)
        }
    }

    const VALID: &str = r#"{"products": [{"description": "Caneta", "quantity": 2, "unit_value": 1.5}]}"#;

    #[tokio::test]
    async fn retries_once_on_parse_failure_then_succeeds() {
        let model = ScriptedModel::new(vec![
            Ok("isto não é JSON".to_string()),
            Ok(VALID.to_string()),
        ]);
        let input = DocumentInput::Text("PEDIDO".to_string());
        let products = call_with_retry(&model, &input, "a.pdf").await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_second_parse_failure() {
        let model = ScriptedModel::new(vec![
            Ok("ruído".to_string()),
            Ok("mais ruído".to_string()),
        ]);
        let input = DocumentInput::Text("PEDIDO".to_string());
        let failure = call_with_retry(&model, &input, "a.pdf").await.unwrap_err();
        assert_eq!(failure.error, FailureKind::ProviderResponseInvalid);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn auth_error_is_not_retried() {
        let model = ScriptedModel::new(vec![Err(ProviderError::Auth("sem créditos".to_string()))]);
        let input = DocumentInput::Text("PEDIDO".to_string());
        let failure = call_with_retry(&model, &input, "a.pdf").await.unwrap_err();
        assert_eq!(failure.error, FailureKind::ProviderAuthError);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_maps_to_provider_timeout() {
        let model = ScriptedModel::new(vec![Err(ProviderError::Timeout)]);
        let input = DocumentInput::Text("PEDIDO".to_string());
        let failure = call_with_retry(&model, &input, "a.pdf").await.unwrap_err();
        assert_eq!(failure.error, FailureKind::ProviderTimeout);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_any_call() {
        let mut settings = Settings::from_env();
        settings.max_file_size = 8;
        let file = UploadedFile {
            name: "grande.pdf".to_string(),
            data: vec![0u8; 64],
        };
        let failure = prepare_input(&file, &settings).await.unwrap_err();
        assert_eq!(failure.error, FailureKind::FileTooLarge);
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let settings = Settings::from_env();
        let file = UploadedFile {
            name: "dados.docx".to_string(),
            data: b"x".to_vec(),
        };
        let failure = prepare_input(&file, &settings).await.unwrap_err();
        assert_eq!(failure.error, FailureKind::UnsupportedFormat);
    }

    #[tokio::test]
    async fn broken_pdf_maps_to_ocr_failure() {
        let settings = Settings::from_env();
        let file = UploadedFile {
            name: "quebrado.pdf".to_string(),
            data: b"not a pdf".to_vec(),
        };
        let failure = prepare_input(&file, &settings).await.unwrap_err();
        assert_eq!(failure.error, FailureKind::OcrFailure);
    }

    #[tokio::test]
    async fn batch_isolates_failures_and_short_circuits_on_auth() {
        // File 1 fails before the provider is ever reached (bad PDF), file 2
        // triggers the auth abort, file 3 must never be attempted.
        let model = ScriptedModel::new(vec![Err(ProviderError::Auth("chave inválida".to_string()))]);
        let settings = Settings::from_env();

        let files = vec![
            UploadedFile { name: "um.docx".to_string(), data: b"x".to_vec() },
            UploadedFile { name: "dois.pdf".to_string(), data: pdf_with_text("PEDIDO 42 Caneta 10") },
            UploadedFile { name: "tres.pdf".to_string(), data: pdf_with_text("PEDIDO 43 Lápis 5") },
        ];

        match process_batch(files, &model, &settings).await {
            BatchOutcome::AuthFailed { file, .. } => assert_eq!(file, "dois.pdf"),
            BatchOutcome::Completed(_) => panic!("expected auth short-circuit"),
        }
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn batch_with_mixed_outcomes_reports_partial_result() {
        // Two good calls around one that times out.
        let model = ScriptedModel::new(vec![
            Ok(VALID.to_string()),
            Err(ProviderError::Timeout),
            Ok(r#"{"products": [{"description": "Lápis", "quantity": 5, "unit_value": 1.0}]}"#.to_string()),
        ]);
        let settings = Settings::from_env();

        let files = vec![
            UploadedFile { name: "f1.pdf".to_string(), data: pdf_with_text("Caneta 2 un") },
            UploadedFile { name: "f2.pdf".to_string(), data: pdf_with_text("Caderno 1 un") },
            UploadedFile { name: "f3.pdf".to_string(), data: pdf_with_text("Lapis 5 un") },
        ];

        let BatchOutcome::Completed(result) = process_batch(files, &model, &settings).await else {
            panic!("expected completed batch");
        };

        assert_eq!(result.processing_info.processed_files, 2);
        assert_eq!(result.processing_info.failed_files.len(), 1);
        assert_eq!(result.processing_info.failed_files[0].file, "f2.pdf");
        assert_eq!(result.processing_info.failed_files[0].error, FailureKind::ProviderTimeout);
        assert_eq!(result.total_products, 2);
    }

    /// Build a minimal one-page PDF carrying `text`, for exercising the real
    /// extraction path without fixtures on disk.
    fn pdf_with_text(text: &str) -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 780.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }
}
