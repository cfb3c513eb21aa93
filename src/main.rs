mod api;
mod cache;
mod config;
mod error;
mod extract;
mod filter;
mod proxy;
mod renderer;
mod scrape;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dotenv::dotenv;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::cache::ResultCache;
use crate::config::ScraperConfig;
use crate::proxy::ProxySessionProvider;
use crate::renderer::ChromeRenderer;
use crate::scrape::ScrapeOrchestrator;

#[derive(OpenApi)]
#[openapi(
    paths(api::scrape, api::scrape_single, api::clear_cache, api::health),
    components(schemas(
        api::ScrapeRequestBody,
        api::ScrapeResponse,
        api::ScrapeSingleBody,
        api::ScrapeSingleResponse,
        api::ClearCacheResponse,
        api::HealthResponse,
        api::ErrorResponse,
        crate::filter::RankedImage,
        crate::extract::DomSource
    )),
    tags((name = "scraper", description = "Listing hero-image scraper API"))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = ScraperConfig::from_env();
    tracing::info!(
        max_retries = config.max_retries,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "starting listing scraper"
    );

    let cache = Arc::new(ResultCache::new(config.cache_ttl));
    let orchestrator = ScrapeOrchestrator::new(
        ChromeRenderer::new(config.clone()),
        ProxySessionProvider::new(config.proxy.clone()),
        cache,
        config.clone(),
    );

    let state = Arc::new(api::AppState {
        orchestrator,
        default_max_images: config.filter.default_max_images,
    });

    let app = Router::new()
        .merge(SwaggerUi::new("/scraper-swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/scrape", post(api::scrape))
        .route("/scrape_single", post(api::scrape_single))
        .route("/clear_cache", post(api::clear_cache))
        .route("/health", get(api::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
