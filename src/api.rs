use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ScrapeError;
use crate::filter::RankedImage;
use crate::renderer::ChromeRenderer;
use crate::scrape::{ScrapeOrchestrator, ScrapeRequest, ScrapeResult};

pub struct AppState {
    pub orchestrator: ScrapeOrchestrator<ChromeRenderer>,
    pub default_max_images: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct ScrapeRequestBody {
    pub url: String,
    pub max_images: Option<usize>,
    pub screenshot: Option<bool>,
}

#[derive(Serialize, ToSchema)]
pub struct ScrapeResponse {
    pub success: bool,
    pub url: String,
    pub title: String,
    pub images: Vec<RankedImage>,
    pub image_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct ScrapeSingleBody {
    pub url: String,
    pub index: usize,
}

#[derive(Serialize, ToSchema)]
pub struct ScrapeSingleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<RankedImage>,
    pub index: usize,
    pub total_images: usize,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ClearCacheResponse {
    pub success: bool,
    pub cleared: usize,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub cache_size: usize,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: ScrapeError) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            success: false,
            error: error.to_string(),
        }),
    )
}

/// Input validation only; everything downstream of a valid URL is a retry
/// decision, not a client error.
fn validate_url(url: &str) -> Result<(), ScrapeError> {
    if url.trim().is_empty() {
        return Err(ScrapeError::Input("url is required".to_string()));
    }
    let parsed =
        url::Url::parse(url).map_err(|e| ScrapeError::Input(format!("invalid url: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ScrapeError::Input(format!(
            "unsupported url scheme: {other}"
        ))),
    }
}

fn to_response(result: ScrapeResult) -> ScrapeResponse {
    ScrapeResponse {
        success: result.success,
        url: result.url,
        title: result.title,
        image_count: result.images.len(),
        images: result.images,
        screenshot_base64: result.screenshot.map(|png| BASE64.encode(png)),
        error: result.error,
        attempts: result.attempt_count,
    }
}

/// Scrape a listing page and return its ranked hero images.
#[utoipa::path(
    post,
    path = "/scrape",
    request_body = ScrapeRequestBody,
    responses(
        (status = 200, description = "Pipeline ran (success flag inside)", body = ScrapeResponse),
        (status = 400, description = "Missing or invalid URL", body = ErrorResponse)
    ),
    tag = "scraper"
)]
pub async fn scrape(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScrapeRequestBody>,
) -> Result<Json<ScrapeResponse>, ApiError> {
    validate_url(&body.url).map_err(bad_request)?;

    let request = ScrapeRequest {
        url: body.url,
        max_images: body.max_images.unwrap_or(state.default_max_images),
        want_screenshot: body.screenshot.unwrap_or(false),
    };
    let result = state.orchestrator.scrape_cached(&request).await;
    Ok(Json(to_response(result)))
}

/// Return one image of the (possibly cached) full result by index.
#[utoipa::path(
    post,
    path = "/scrape_single",
    request_body = ScrapeSingleBody,
    responses(
        (status = 200, description = "Single image lookup", body = ScrapeSingleResponse),
        (status = 400, description = "Missing or invalid URL", body = ErrorResponse)
    ),
    tag = "scraper"
)]
pub async fn scrape_single(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScrapeSingleBody>,
) -> Result<Json<ScrapeSingleResponse>, ApiError> {
    validate_url(&body.url).map_err(bad_request)?;

    let request = ScrapeRequest {
        url: body.url,
        max_images: state.default_max_images,
        want_screenshot: false,
    };
    let result = state.orchestrator.scrape_cached(&request).await;

    let total_images = result.images.len();
    let image = result.images.into_iter().nth(body.index);
    Ok(Json(ScrapeSingleResponse {
        success: result.success && image.is_some(),
        has_more: body.index + 1 < total_images,
        image,
        index: body.index,
        total_images,
        error: result.error,
    }))
}

/// Evict every cached result.
#[utoipa::path(
    post,
    path = "/clear_cache",
    responses((status = 200, description = "Cache cleared", body = ClearCacheResponse)),
    tag = "scraper"
)]
pub async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<ClearCacheResponse> {
    let cleared = state.orchestrator.cache().clear();
    tracing::info!(cleared, "cache cleared");
    Json(ClearCacheResponse {
        success: true,
        cleared,
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Process status", body = HealthResponse)),
    tag = "scraper"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache_size: state.orchestrator.cache().len(),
    })
}
