//! Slip Review - compares scanned tax slips against data-entry screenshots
//! with a vision model and returns a discrepancy report.

mod comparator;
mod config;
mod convert;
mod error;
mod openai;
mod pricing;
mod prompt;
mod report;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use comparator::{ComparisonResult, Comparator};
use config::Settings;
use convert::embedded::EmbeddedImageConverter;
use convert::process::ProcessConverter;
use convert::sidecar::SidecarConverter;
use convert::{ConverterKind, ImageConverter, UploadedFile};
use openai::OpenAiClient;
use pricing::PricingTable;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    comparator: Arc<Comparator>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "slip_review=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    if settings.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; comparisons will fail until it is configured");
    }

    let pricing = match &settings.pricing_file {
        Some(path) => PricingTable::load_from_file(path)?,
        None => PricingTable::default(),
    };

    let openai = OpenAiClient::new(
        settings.api_url.clone(),
        settings.max_tokens,
        settings.request_timeout,
    )?;
    let converter = build_converter(&settings)?;
    info!(
        "Using model {} with {} converter",
        settings.model,
        converter.name()
    );

    let comparator = Comparator::new(
        Arc::new(openai),
        converter,
        pricing,
        settings.api_key.clone(),
        settings.model.clone(),
    );

    let app = router(AppState {
        comparator: Arc::new(comparator),
    });

    // Run server
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/review/defaults", get(review_defaults))
        .route("/review/compare", post(compare_documents))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024)) // 100MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn build_converter(settings: &Settings) -> anyhow::Result<Arc<dyn ImageConverter>> {
    match settings.converter {
        ConverterKind::Embedded => {
            let fallback = settings
                .converter_fallback
                .map(|kind| page_renderer(kind, settings))
                .transpose()?;
            if let Some(fallback) = &fallback {
                info!("Pages without a scan image are rendered by the {} converter", fallback.name());
            }
            Ok(Arc::new(EmbeddedImageConverter::new(fallback)))
        }
        kind => page_renderer(kind, settings),
    }
}

/// A converter that renders whole pages, vector content included.
fn page_renderer(kind: ConverterKind, settings: &Settings) -> anyhow::Result<Arc<dyn ImageConverter>> {
    match kind {
        ConverterKind::Process => Ok(Arc::new(ProcessConverter::from_command_line(
            &settings.converter_command,
        )?)),
        ConverterKind::Sidecar => Ok(Arc::new(SidecarConverter::new(
            settings.converter_url.clone(),
            reqwest::Client::new(),
        ))),
        ConverterKind::Embedded => anyhow::bail!("The embedded converter cannot render vector pages"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewDefaults {
    instructions: &'static str,
    recognized_forms: Vec<&'static str>,
    all_clear_sentinel: &'static str,
    section_headers: Vec<&'static str>,
    model: String,
}

/// Starting instructions and report grammar for the review screen.
async fn review_defaults(State(state): State<AppState>) -> Json<ReviewDefaults> {
    Json(ReviewDefaults {
        instructions: prompt::DEFAULT_INSTRUCTIONS,
        recognized_forms: prompt::RECOGNIZED_FORMS.to_vec(),
        all_clear_sentinel: prompt::ALL_CLEAR_SENTINEL,
        section_headers: vec![
            prompt::DISCREPANCIES_HEADER,
            prompt::MISSING_DATA_HEADER,
            prompt::SUMMARY_HEADER,
        ],
        model: state.comparator.model().to_string(),
    })
}

/// Compare uploaded data-entry documents against reference slips.
///
/// Multipart fields: `reference` (repeatable file), `candidate` (repeatable
/// file), `instructions` (optional text).
async fn compare_documents(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ComparisonResult>, (StatusCode, String)> {
    let mut reference = Vec::new();
    let mut candidate = Vec::new();
    let mut instructions = String::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        let field_name = field.name().unwrap_or_default().to_string();

        if field_name == "instructions" {
            instructions = field.text().await.map_err(|e| {
                (StatusCode::BAD_REQUEST, format!("Failed to read instructions: {}", e))
            })?;
            continue;
        }

        let name = field.file_name().unwrap_or("document").to_string();
        let mime_type = field.content_type().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(|e| {
            (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
        })?.to_vec();

        let upload = UploadedFile { name, mime_type, data };
        match field_name.as_str() {
            "reference" => reference.push(upload),
            "candidate" => candidate.push(upload),
            other => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    format!("Unexpected field '{}'; use reference, candidate or instructions", other),
                ))
            }
        }
    }

    let result = state
        .comparator
        .compare(&reference, &candidate, &instructions)
        .await;

    Ok(Json(result))
}
