use std::ffi::OsStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::error::NavigationError;
use crate::extract::{self, CandidateImage, SiteHint, Tier};
use crate::proxy::{write_auth_extension, ProxySession};

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    ]
});

const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 4 });
    window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} };
"#;

/// Everything one render attempt produced.
#[derive(Debug, Clone)]
pub struct PageCapture {
    pub title: String,
    pub final_url: String,
    pub candidates: Vec<CandidateImage>,
    pub screenshot: Option<Vec<u8>>,
}

/// One full render-and-extract attempt against a fresh browser. The trait
/// seam lets the orchestrator's retry machine run against a fake in tests.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn attempt(
        &self,
        url: &str,
        session: &ProxySession,
        attempt: usize,
        site: SiteHint,
        want_screenshot: bool,
    ) -> std::result::Result<PageCapture, NavigationError>;
}

pub struct ChromeRenderer {
    config: ScraperConfig,
}

impl ChromeRenderer {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    async fn run(
        &self,
        url: &str,
        session: &ProxySession,
        attempt: usize,
        site: SiteHint,
        want_screenshot: bool,
    ) -> Result<PageCapture> {
        let ext_dir = write_auth_extension(session).context("proxy auth extension")?;

        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let ua_arg = format!("--user-agent={user_agent}");
        let proxy_arg = format!("--proxy-server={}", session.server);
        let ext_arg = format!("--load-extension={}", ext_dir.display());

        let mut args: Vec<&OsStr> = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--ignore-certificate-errors"),
        ];
        args.push(OsStr::new(&ua_arg));
        args.push(OsStr::new(&proxy_arg));
        args.push(OsStr::new(&ext_arg));

        info!(
            url,
            attempt,
            rotation_id = %session.rotation_id,
            "launching browser"
        );

        // Fresh browser per attempt: no cookies or cache survive a session
        // rotation, so a banned fingerprint cannot follow the new IP.
        let result = self
            .drive_page(url, attempt, site, want_screenshot, args)
            .await;

        let _ = std::fs::remove_dir_all(&ext_dir);
        result
    }

    async fn drive_page(
        &self,
        url: &str,
        attempt: usize,
        site: SiteHint,
        want_screenshot: bool,
        args: Vec<&OsStr>,
    ) -> Result<PageCapture> {
        let browser = Browser::new(LaunchOptions {
            headless: true,
            window_size: Some((1920, 1080)),
            args,
            ..Default::default()
        })
        .context("browser launch")?;

        let tab = browser.new_tab().context("open tab")?;
        tab.set_default_timeout(self.config.nav_timeout(attempt));

        tab.enable_debugger()?;
        tab.call_method(
            headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument {
                source: STEALTH_SCRIPT.to_string(),
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            },
        )?;

        tab.navigate_to(url).context("navigate")?;
        // DOM readiness only. Listing pages keep background connections open
        // forever, so waiting for network idle times out on healthy pages.
        tab.wait_until_navigated().context("dom ready")?;

        let title = tab.get_title().unwrap_or_default();
        let final_url = tab.get_url();
        debug!(title = %title, url = %final_url, "page loaded");

        // Settle, then a scroll cycle to trigger lazy-loaded sources.
        sleep(self.config.settle_delay).await;
        let _ = tab.evaluate("window.scrollTo(0, 500)", false);
        sleep(Duration::from_secs(1)).await;
        let _ = tab.evaluate("window.scrollTo(0, 0)", false);
        sleep(Duration::from_secs(2)).await;

        let candidates = self.extract_candidates(&tab, site);
        info!(count = candidates.len(), ?site, "candidates extracted");

        let screenshot = if want_screenshot {
            let png = tab
                .capture_screenshot(
                    headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption::Png,
                    None,
                    None,
                    true,
                )
                .context("screenshot")?;
            Some(png)
        } else {
            None
        };

        Ok(PageCapture {
            title,
            final_url,
            candidates,
            screenshot,
        })
    }

    /// Run the site's extraction tiers in order, stopping at the first that
    /// yields candidates. Script evaluation failures degrade to zero
    /// candidates rather than failing the attempt.
    fn extract_candidates(&self, tab: &headless_chrome::Tab, site: SiteHint) -> Vec<CandidateImage> {
        for tier in extract::tiers(site) {
            let candidates = match tier {
                Tier::Hydration => match tab.get_content() {
                    Ok(html) => extract::hydration_candidates(&html, site),
                    Err(e) => {
                        warn!(error = %e, "page content read failed");
                        Vec::new()
                    }
                },
                Tier::ScopedDom | Tier::HeroDom => {
                    let script = extract::dom_scan_script(site, *tier, &self.config.filter);
                    match tab.evaluate(&script, true) {
                        Ok(obj) => obj
                            .value
                            .map(|v| extract::parse_dom_candidates(&v))
                            .unwrap_or_default(),
                        Err(e) => {
                            warn!(error = %e, ?tier, "dom scan evaluation failed");
                            Vec::new()
                        }
                    }
                }
            };
            if !candidates.is_empty() {
                debug!(?tier, count = candidates.len(), "tier produced candidates");
                return candidates;
            }
        }
        Vec::new()
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn attempt(
        &self,
        url: &str,
        session: &ProxySession,
        attempt: usize,
        site: SiteHint,
        want_screenshot: bool,
    ) -> std::result::Result<PageCapture, NavigationError> {
        self.run(url, session, attempt, site, want_screenshot)
            .await
            .map_err(|e| NavigationError::new(attempt, format!("{e:#}")))
    }
}
