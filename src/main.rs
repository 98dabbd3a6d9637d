//! Purchase-order consolidation server.
//!
//! Accepts batches of order documents (PDF/PNG/JPG), extracts line items via
//! a configured AI provider, consolidates the products across files, and
//! serves the result as a downloadable PDF/XLSX/CSV report.

mod catalog;
mod config;
mod consolidate;
mod error;
mod orchestrator;
mod provider;
mod report;
mod schema;
mod session;
mod textextract;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalog::{ProviderCatalog, ProviderInfo};
use config::Settings;
use orchestrator::{BatchOutcome, UploadedFile};
use report::ReportFormat;
use schema::{ModelsResponse, UploadResponse};
use session::SessionStore;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    catalog: Arc<ProviderCatalog>,
    sessions: SessionStore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "order_consolidator=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();
    let catalog = ProviderCatalog::load_from_env();
    info!(
        "Settings: max {} files, {} bytes each, session TTL {:?}",
        settings.max_files, settings.max_file_size, settings.session_ttl
    );

    // Whole-request ceiling: every file at the limit plus form overhead.
    let body_limit = settings.max_file_size * settings.max_files + 1024 * 1024;
    let bind_addr = settings.bind_addr.clone();

    let state = AppState {
        settings: Arc::new(settings),
        catalog: Arc::new(catalog),
        sessions: SessionStore::new(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/providers", get(list_providers))
        .route("/api/models/{provider}", get(list_models))
        .route("/api/upload", post(upload_files))
        .route("/api/report/{session_id}/{format}", get(generate_report))
        .route("/api/cleanup/{session_id}", post(cleanup_session))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// List available AI providers.
async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    Json(state.catalog.providers())
}

/// List models for a specific provider.
async fn list_models(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> (StatusCode, Json<ModelsResponse>) {
    match state.catalog.models(&provider) {
        Some(models) => (
            StatusCode::OK,
            Json(ModelsResponse { success: true, models, error: None }),
        ),
        None => (
            StatusCode::BAD_REQUEST,
            Json(ModelsResponse {
                success: false,
                models: Vec::new(),
                error: Some(format!("Provider '{}' not supported", provider)),
            }),
        ),
    }
}

/// Handle file upload and processing.
async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<UploadResponse>) {
    let mut provider = String::new();
    let mut api_key = String::new();
    let mut model = String::new();
    let mut files: Vec<UploadedFile> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return bad_request(format!("Erro no upload: {}", e));
            }
        };

        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "provider" => match field.text().await {
                Ok(value) => provider = value,
                Err(e) => return bad_request(format!("Erro no upload: {}", e)),
            },
            "api_key" => match field.text().await {
                Ok(value) => api_key = value,
                Err(e) => return bad_request(format!("Erro no upload: {}", e)),
            },
            "model" => match field.text().await {
                Ok(value) => model = value,
                Err(e) => return bad_request(format!("Erro no upload: {}", e)),
            },
            "files" => {
                let name = field.file_name().unwrap_or("documento").to_string();
                match field.bytes().await {
                    Ok(bytes) => files.push(UploadedFile { name, data: bytes.to_vec() }),
                    Err(e) => return bad_request(format!("Falha ao ler {}: {}", name, e)),
                }
            }
            _ => {}
        }
    }

    if provider.is_empty() {
        provider = "openai".to_string();
    }
    if !state.catalog.contains(&provider) {
        return bad_request(format!("Provider '{}' not supported", provider));
    }
    if model.is_empty() {
        // Catalog membership was checked just above.
        model = state.catalog.default_model(&provider).unwrap_or_default();
    }

    // Validate the key format first to avoid wasting credits on calls that
    // can only fail.
    if api_key.is_empty() {
        return bad_request("Chave API é obrigatória".to_string());
    }
    if !state.catalog.validate_api_key(&provider, &api_key) {
        return (
            StatusCode::BAD_REQUEST,
            Json(UploadResponse::err_modal(format!(
                "Formato de chave API inválido para {}. Verifique se a chave está correta.",
                provider
            ))),
        );
    }

    if files.is_empty() {
        return bad_request("Nenhum arquivo enviado".to_string());
    }
    if files.len() > state.settings.max_files {
        return bad_request(format!(
            "Máximo de {} arquivos permitidos",
            state.settings.max_files
        ));
    }

    info!(
        "Processing batch: {} file(s) via {} ({})",
        files.len(),
        provider,
        model
    );

    let client = match provider::client_for(&provider, &api_key, &model, state.settings.provider_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("Error initializing AI client: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(UploadResponse::err_modal(
                    "Erro ao conectar com o provedor de IA. Verifique sua chave API e tente novamente.",
                )),
            );
        }
    };

    match orchestrator::process_batch(files, client.as_ref(), &state.settings).await {
        BatchOutcome::AuthFailed { file, message } => {
            error!("Auth failure on {}: {}", file, message);
            (
                StatusCode::UNAUTHORIZED,
                Json(UploadResponse::err_modal(
                    "Erro de autenticação. A chave API é inválida ou não tem créditos.",
                )),
            )
        }
        BatchOutcome::Completed(result) => {
            // A batch where nothing could be processed gets a single
            // descriptive error instead of an empty result.
            if result.processing_info.processed_files == 0 {
                let detail = result
                    .processing_info
                    .failed_files
                    .first()
                    .map(|f| format!("{}: {}", f.file, f.message))
                    .unwrap_or_else(|| "nenhum arquivo válido".to_string());
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(UploadResponse::err(format!(
                        "Erro no processamento dos documentos ({})",
                        detail
                    ))),
                );
            }

            let session_id = SessionStore::new_session_id();
            state
                .sessions
                .put(&session_id, result.clone(), state.settings.session_ttl);
            info!("Batch stored under session {}", session_id);
            (StatusCode::OK, Json(UploadResponse::ok(session_id, result)))
        }
    }
}

/// Generate and download a report in the requested format.
async fn generate_report(
    State(state): State<AppState>,
    Path((session_id, format)): Path<(String, String)>,
) -> Response {
    let Some(format) = ReportFormat::from_str(&format) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(UploadResponse::err("Formato não suportado")),
        )
            .into_response();
    };

    let Some(result) = state.sessions.get(&session_id) else {
        info!("Report request for {}: {}", session_id, error::FailureKind::UnknownSession);
        return (
            StatusCode::NOT_FOUND,
            Json(UploadResponse::err(
                "Sessão expirada ou não encontrada. Processe os documentos novamente.",
            )),
        )
            .into_response();
    };

    match report::render(&result, format) {
        Ok(bytes) => {
            let filename = format!("pedido_compra_{}.{}", session_id, format.extension());
            (
                [
                    (header::CONTENT_TYPE, format.mime_type().to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            error!("Error generating report: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UploadResponse::err(format!("Erro ao gerar relatório: {}", e))),
            )
                .into_response()
        }
    }
}

/// Drop a session's stored result ahead of its TTL.
async fn cleanup_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let removed = state.sessions.remove(&session_id);
    Json(serde_json::json!({ "success": removed }))
}

fn bad_request(message: String) -> (StatusCode, Json<UploadResponse>) {
    (StatusCode::BAD_REQUEST, Json(UploadResponse::err(message)))
}
