use std::sync::Arc;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::cache::ResultCache;
use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::extract::site_hint;
use crate::filter::{filter_rank, RankedImage};
use crate::proxy::ProxySessionProvider;
use crate::renderer::Renderer;

#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub url: String,
    pub max_images: usize,
    pub want_screenshot: bool,
}

/// Outcome of one full pipeline run. Immutable once built; the cached copy
/// is only ever replaced wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeResult {
    pub success: bool,
    pub url: String,
    pub title: String,
    pub images: Vec<RankedImage>,
    pub screenshot: Option<Vec<u8>>,
    pub error: Option<String>,
    pub attempt_count: usize,
}

/// Drives the per-request pipeline: fresh proxy session, render, extract,
/// filter, optional screenshot, with session-rotated retries. IP bans are
/// the dominant failure mode, so every retry gets a brand-new rotation id
/// rather than reusing the one that just failed.
pub struct ScrapeOrchestrator<R> {
    renderer: R,
    sessions: ProxySessionProvider,
    cache: Arc<ResultCache>,
    config: ScraperConfig,
}

impl<R: Renderer> ScrapeOrchestrator<R> {
    pub fn new(
        renderer: R,
        sessions: ProxySessionProvider,
        cache: Arc<ResultCache>,
        config: ScraperConfig,
    ) -> Self {
        Self {
            renderer,
            sessions,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Serve from cache when a fresh-enough result exists, otherwise run the
    /// full pipeline.
    pub async fn scrape_cached(&self, request: &ScrapeRequest) -> ScrapeResult {
        if let Some(hit) = self.cache.get(&request.url) {
            info!(url = %request.url, "serving cached result");
            return hit;
        }
        self.scrape(request).await
    }

    /// Run the pipeline with up to `max_retries` session-rotated attempts.
    /// Only a successful run is cached; exhaustion returns a well-formed
    /// failure result carrying the last cause.
    pub async fn scrape(&self, request: &ScrapeRequest) -> ScrapeResult {
        let site = site_hint(&request.url);
        let mut last_error = String::from("no attempts made");

        for attempt in 0..self.config.max_retries {
            let session = self.sessions.next();
            match self
                .renderer
                .attempt(
                    &request.url,
                    &session,
                    attempt,
                    site,
                    request.want_screenshot,
                )
                .await
            {
                Ok(capture) => {
                    let images =
                        filter_rank(capture.candidates, &self.config.filter, request.max_images);
                    info!(
                        url = %request.url,
                        final_url = %capture.final_url,
                        attempt = attempt + 1,
                        images = images.len(),
                        "scrape succeeded"
                    );
                    let result = ScrapeResult {
                        success: true,
                        url: request.url.clone(),
                        title: capture.title,
                        images,
                        screenshot: capture.screenshot,
                        error: None,
                        attempt_count: attempt + 1,
                    };
                    self.cache.put(&request.url, result.clone());
                    return result;
                }
                Err(e) => {
                    let err = ScrapeError::Navigation(e);
                    warn!(
                        url = %request.url,
                        attempt = attempt + 1,
                        max = self.config.max_retries,
                        error = %err,
                        "attempt failed"
                    );
                    last_error = err.to_string();
                    if attempt + 1 < self.config.max_retries {
                        sleep(self.config.retry_backoff).await;
                    }
                }
            }
        }

        let exhausted = ScrapeError::Exhausted {
            attempts: self.config.max_retries,
            last_error,
        };
        error!(url = %request.url, error = %exhausted, "giving up");
        ScrapeResult {
            success: false,
            url: request.url.clone(),
            title: String::new(),
            images: Vec::new(),
            screenshot: None,
            error: Some(exhausted.to_string()),
            attempt_count: self.config.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterConfig, ProxyConfig};
    use crate::error::NavigationError;
    use crate::extract::{CandidateImage, DomSource, SiteHint};
    use crate::proxy::ProxySession;
    use crate::renderer::PageCapture;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeRenderer {
        fail_first: usize,
        seen_sessions: Mutex<Vec<String>>,
    }

    impl FakeRenderer {
        fn failing(fail_first: usize) -> Self {
            Self {
                fail_first,
                seen_sessions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn attempt(
            &self,
            _url: &str,
            session: &ProxySession,
            attempt: usize,
            _site: SiteHint,
            want_screenshot: bool,
        ) -> Result<PageCapture, NavigationError> {
            self.seen_sessions
                .lock()
                .unwrap()
                .push(session.rotation_id.clone());
            if attempt < self.fail_first {
                return Err(NavigationError::new(attempt, "navigation timeout"));
            }
            Ok(PageCapture {
                title: "123 Main St".to_string(),
                final_url: "https://example.com/listing".to_string(),
                candidates: vec![
                    CandidateImage {
                        url: "https://cdn.example/hero.jpg".to_string(),
                        width: 1280.0,
                        height: 720.0,
                        top_offset: Some(0.0),
                        dom_source: DomSource::ImgTag,
                        in_recommended_block: false,
                    },
                    CandidateImage {
                        url: "https://cdn.example/logo.png".to_string(),
                        width: 300.0,
                        height: 100.0,
                        top_offset: Some(0.0),
                        dom_source: DomSource::ImgTag,
                        in_recommended_block: false,
                    },
                ],
                screenshot: want_screenshot.then(|| vec![0x89, 0x50, 0x4e, 0x47]),
            })
        }
    }

    fn test_config(max_retries: usize) -> ScraperConfig {
        ScraperConfig {
            proxy: ProxyConfig {
                host: "proxy.test".into(),
                port: 33335,
                username: "user".into(),
                password: "pass".into(),
            },
            max_retries,
            retry_backoff: Duration::ZERO,
            nav_timeout_first: Duration::from_secs(60),
            nav_timeout_retry: Duration::from_secs(45),
            settle_delay: Duration::ZERO,
            cache_ttl: Duration::from_secs(300),
            filter: FilterConfig::default(),
        }
    }

    fn orchestrator(renderer: FakeRenderer, max_retries: usize) -> ScrapeOrchestrator<FakeRenderer> {
        let config = test_config(max_retries);
        ScrapeOrchestrator::new(
            renderer,
            ProxySessionProvider::new(config.proxy.clone()),
            Arc::new(ResultCache::new(config.cache_ttl)),
            config,
        )
    }

    fn request(url: &str) -> ScrapeRequest {
        ScrapeRequest {
            url: url.to_string(),
            max_images: 8,
            want_screenshot: false,
        }
    }

    #[tokio::test]
    async fn succeeds_first_attempt_and_caches() {
        let orch = orchestrator(FakeRenderer::failing(0), 3);
        let result = orch.scrape(&request("https://example.com/listing")).await;

        assert!(result.success);
        assert_eq!(result.attempt_count, 1);
        assert_eq!(result.title, "123 Main St");
        // Logo filtered out, hero kept.
        assert_eq!(result.images.len(), 1);
        assert_eq!(result.images[0].url, "https://cdn.example/hero.jpg");
        assert_eq!(
            orch.cache().get("https://example.com/listing"),
            Some(result)
        );
    }

    #[tokio::test]
    async fn retries_with_fresh_sessions_then_succeeds() {
        let orch = orchestrator(FakeRenderer::failing(2), 5);
        let result = orch.scrape(&request("https://example.com/listing")).await;

        assert!(result.success);
        assert_eq!(result.attempt_count, 3);

        let sessions = orch.renderer.seen_sessions.lock().unwrap();
        assert_eq!(sessions.len(), 3);
        let unique: std::collections::HashSet<_> = sessions.iter().collect();
        assert_eq!(unique.len(), 3, "every attempt must rotate its session");
    }

    #[tokio::test]
    async fn exhaustion_reports_last_error_and_skips_cache() {
        let orch = orchestrator(FakeRenderer::failing(usize::MAX), 3);
        let result = orch.scrape(&request("https://example.com/listing")).await;

        assert!(!result.success);
        assert_eq!(result.attempt_count, 3);
        assert!(result.error.as_deref().unwrap().contains("navigation timeout"));
        assert!(result.images.is_empty());
        assert!(orch.cache().get("https://example.com/listing").is_none());

        // Retry ceiling honored exactly.
        assert_eq!(orch.renderer.seen_sessions.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cached_result_short_circuits_the_pipeline() {
        let orch = orchestrator(FakeRenderer::failing(0), 3);
        let req = request("https://example.com/listing");

        let first = orch.scrape_cached(&req).await;
        let second = orch.scrape_cached(&req).await;
        assert_eq!(first, second);
        // Only the first call hit the renderer.
        assert_eq!(orch.renderer.seen_sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn screenshot_is_carried_through() {
        let orch = orchestrator(FakeRenderer::failing(0), 3);
        let mut req = request("https://example.com/listing");
        req.want_screenshot = true;
        let result = orch.scrape(&req).await;
        assert!(result.screenshot.is_some());
    }

    #[tokio::test]
    async fn max_images_bounds_the_result() {
        let orch = orchestrator(FakeRenderer::failing(0), 3);
        let mut req = request("https://example.com/listing");
        req.max_images = 0;
        let result = orch.scrape(&req).await;
        assert!(result.success);
        assert!(result.images.is_empty());
    }
}
