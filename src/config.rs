use std::env;
use std::time::Duration;

/// Upstream rotating-proxy endpoint. The rotation id is appended to the
/// username per session, which is what makes the proxy assign a new egress
/// IP on the next connect.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ProxyConfig {
    pub fn server(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Vertical extent of the hero region scanned on generic sites.
    pub hero_height_px: f64,
    pub min_image_width: f64,
    pub min_image_height: f64,
    /// Default result size when the request does not specify one.
    pub default_max_images: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            hero_height_px: 800.0,
            min_image_width: 50.0,
            min_image_height: 50.0,
            default_max_images: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub proxy: ProxyConfig,
    pub max_retries: usize,
    pub retry_backoff: Duration,
    /// Navigation budget for the first attempt (cold proxy connections are slow).
    pub nav_timeout_first: Duration,
    /// Shorter budget for later attempts so a dead session fails fast.
    pub nav_timeout_retry: Duration,
    pub settle_delay: Duration,
    pub cache_ttl: Duration,
    pub filter: FilterConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ScraperConfig {
    pub fn from_env() -> Self {
        let proxy = ProxyConfig {
            host: env::var("PROXY_HOST").unwrap_or_else(|_| "brd.superproxy.io".to_string()),
            port: env_or("PROXY_PORT", 33335),
            username: env::var("PROXY_USERNAME").unwrap_or_default(),
            password: env::var("PROXY_PASSWORD").unwrap_or_default(),
        };

        Self {
            proxy,
            max_retries: env_or("MAX_RETRIES", 3),
            retry_backoff: Duration::from_secs(env_or("RETRY_BACKOFF_SECS", 2)),
            nav_timeout_first: Duration::from_secs(env_or("NAV_TIMEOUT_FIRST_SECS", 60)),
            nav_timeout_retry: Duration::from_secs(env_or("NAV_TIMEOUT_RETRY_SECS", 45)),
            settle_delay: Duration::from_secs(env_or("SETTLE_DELAY_SECS", 3)),
            cache_ttl: Duration::from_secs(env_or("CACHE_TTL_SECS", 300)),
            filter: FilterConfig {
                hero_height_px: env_or("HERO_HEIGHT_PX", 800.0),
                min_image_width: env_or("MIN_IMAGE_WIDTH", 50.0),
                min_image_height: env_or("MIN_IMAGE_HEIGHT", 50.0),
                default_max_images: env_or("MAX_IMAGES_DEFAULT", 8),
            },
        }
    }

    pub fn nav_timeout(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            self.nav_timeout_first
        } else {
            self.nav_timeout_retry
        }
    }
}
