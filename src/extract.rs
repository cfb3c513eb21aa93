use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

use crate::config::FilterConfig;

/// Recursion cap for the hydration-payload walk; bounds worst-case cost on
/// pathological documents.
const MAX_JSON_DEPTH: usize = 12;

/// Keys plausibly holding photo arrays inside a hydration payload.
const PHOTO_KEYS: &[&str] = &[
    "photos",
    "photourls",
    "images",
    "fullscreenphotos",
    "heroimage",
    "media",
    "gallery",
];

/// Fields that carry the URL inside a photo object.
const URL_FIELDS: &[&str] = &["url", "photourl", "src", "imageurl", "href"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteHint {
    Redfin,
    Zillow,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DomSource {
    ImgTag,
    Background,
    Picture,
    JsonState,
}

/// Raw image found on the page, before filtering. Width/height are 0 and
/// `top_offset` is `None` when the URL came out of a hydration payload with
/// no layout attached.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateImage {
    pub url: String,
    pub width: f64,
    pub height: f64,
    pub top_offset: Option<f64>,
    pub dom_source: DomSource,
    pub in_recommended_block: bool,
}

/// Extraction passes to run, in order, stopping at the first that yields
/// candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Parse the server-rendered JSON state out of the page HTML.
    Hydration,
    /// DOM scan restricted to the site's known gallery/hero containers.
    ScopedDom,
    /// Unrestricted DOM scan bounded to the hero region.
    HeroDom,
}

pub fn tiers(site: SiteHint) -> &'static [Tier] {
    match site {
        SiteHint::Redfin | SiteHint::Zillow => &[Tier::Hydration, Tier::ScopedDom, Tier::HeroDom],
        SiteHint::Generic => &[Tier::HeroDom],
    }
}

/// Site strategy picked once at request entry from the URL host.
pub fn site_hint(url: &str) -> SiteHint {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()));
    match host.as_deref() {
        Some(h) if h == "redfin.com" || h.ends_with(".redfin.com") => SiteHint::Redfin,
        Some(h) if h == "zillow.com" || h.ends_with(".zillow.com") => SiteHint::Zillow,
        _ => SiteHint::Generic,
    }
}

/// Only URLs on the site's own photo CDN are trusted out of a hydration
/// payload; everything else in there is chrome, maps and tracking.
fn on_photo_cdn(url: &str, site: SiteHint) -> bool {
    let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    else {
        return false;
    };
    match site {
        SiteHint::Redfin => host.ends_with("cdn-redfin.com"),
        SiteHint::Zillow => host.ends_with("zillowstatic.com"),
        SiteHint::Generic => false,
    }
}

// ---------------------------------------------------------------------------
// Tier 1: hydration payload
// ---------------------------------------------------------------------------

/// Pull every JSON document embedded in the page's script tags. Handles both
/// pure-JSON tags and `window.__STATE__ = {...}` assignments by slicing from
/// the first brace.
fn script_json_documents(html: &str) -> Vec<serde_json::Value> {
    let document = Html::parse_document(html);
    let script_selector = Selector::parse("script").unwrap();
    document
        .select(&script_selector)
        .filter_map(|el| {
            let text: String = el.text().collect();
            let trimmed = text.trim();
            if trimmed.len() < 2 {
                return None;
            }
            serde_json::from_str(trimmed).ok().or_else(|| {
                let start = trimmed.find('{')?;
                let end = trimmed.rfind('}')?;
                if start >= end {
                    return None;
                }
                serde_json::from_str(&trimmed[start..=end]).ok()
            })
        })
        .collect()
}

fn looks_like_photo_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    PHOTO_KEYS.iter().any(|k| lower.contains(k))
}

/// Pull URL strings out of a value found under a photo key: a bare string,
/// an array of strings, or (arrays of) objects with a URL-bearing field.
fn collect_photo_urls(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => {
            if s.starts_with("http") {
                out.push(s.clone());
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_photo_urls(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for (key, field) in map {
                if URL_FIELDS.contains(&key.to_lowercase().as_str()) {
                    collect_photo_urls(field, out);
                }
            }
        }
        _ => {}
    }
}

fn walk_for_photos(value: &serde_json::Value, depth: usize, out: &mut Vec<String>) {
    if depth > MAX_JSON_DEPTH {
        return;
    }
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                if looks_like_photo_key(key) {
                    collect_photo_urls(child, out);
                }
                walk_for_photos(child, depth + 1, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                walk_for_photos(item, depth + 1, out);
            }
        }
        // Server frameworks nest stringified JSON inside JSON; descend one
        // level into anything that parses.
        serde_json::Value::String(s) => {
            if s.len() > 2 && (s.starts_with('{') || s.starts_with('[')) {
                if let Ok(nested) = serde_json::from_str::<serde_json::Value>(s) {
                    walk_for_photos(&nested, depth + 1, out);
                }
            }
        }
        _ => {}
    }
}

/// Structured tier: search the page's embedded JSON state for photo arrays,
/// accepting only URLs on the site's photo CDN. No layout info, so the
/// candidates carry no box and no offset.
pub fn hydration_candidates(html: &str, site: SiteHint) -> Vec<CandidateImage> {
    let mut urls = Vec::new();
    for doc in script_json_documents(html) {
        walk_for_photos(&doc, 0, &mut urls);
    }
    urls.retain(|u| on_photo_cdn(u, site));

    urls.into_iter()
        .map(|url| CandidateImage {
            url,
            width: 0.0,
            height: 0.0,
            top_offset: None,
            dom_source: DomSource::JsonState,
            in_recommended_block: false,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tiers 2/3: in-page DOM scan
// ---------------------------------------------------------------------------

fn gallery_selectors(site: SiteHint) -> &'static str {
    match site {
        SiteHint::Redfin => {
            r#"[data-rf-test-id*="photo"], [data-rf-test-id*="image"], .MediaGallery, .PhotosView, .HomeViews, [class*="photo"], [class*="Photo"], [class*="gallery"], [class*="Gallery"]"#
        }
        SiteHint::Zillow => {
            r#"[data-testid*="photo"], [data-testid*="media"], .media-stream, [class*="photo"], [class*="Photo"], [class*="carousel"], [class*="Carousel"]"#
        }
        SiteHint::Generic => "",
    }
}

/// Build the in-page scan. The DOM is gone by the time the Rust-side filter
/// runs, so the ancestor walk that spots "similar homes" blocks has to
/// happen here and ride along on each candidate as `excluded`.
pub fn dom_scan_script(site: SiteHint, tier: Tier, cfg: &FilterConfig) -> String {
    let scope = if tier == Tier::ScopedDom {
        gallery_selectors(site)
    } else {
        ""
    };
    format!(
        r#"
        (() => {{
            const heroHeight = {hero_height};
            const scopeSelectors = {scope:?};
            const recommendedTokens = ['similar', 'nearby', 'recommended', 'sold', 'related', 'also-viewed', 'alsoviewed'];
            const candidates = [];
            const seen = new Set();

            const inRecommendedBlock = (el) => {{
                let node = el;
                for (let i = 0; i < 12 && node; i++) {{
                    const marker = ((node.className || '') + ' ' + (node.id || '')).toString().toLowerCase();
                    if (recommendedTokens.some(t => marker.includes(t))) return true;
                    const heading = node.querySelector && node.querySelector(':scope > h2, :scope > h3');
                    if (heading && recommendedTokens.some(t => heading.textContent.toLowerCase().includes(t))) return true;
                    node = node.parentElement;
                }}
                return false;
            }};

            const add = (url, width, height, top, source, el) => {{
                if (!url || seen.has(url)) return;
                if (!url.startsWith('http')) return;
                seen.add(url);
                candidates.push({{ url, width, height, top, source, excluded: inRecommendedBlock(el) }});
            }};

            const imgSources = (img) => [
                img.currentSrc,
                img.src,
                img.dataset ? img.dataset.src : null,
                img.getAttribute('data-src'),
                img.getAttribute('data-lazy-src'),
                img.getAttribute('data-original'),
                img.srcset ? img.srcset.split(',')[0].trim().split(' ')[0] : null
            ].filter(Boolean);

            const scanImg = (img, boundTop) => {{
                const rect = img.getBoundingClientRect();
                if (boundTop !== null && rect.top >= boundTop) return;
                const srcs = imgSources(img);
                if (srcs.length > 0) add(srcs[0], rect.width, rect.height, rect.top, 'img_tag', img);
            }};

            const scanBackground = (el, boundTop) => {{
                const rect = el.getBoundingClientRect();
                if (boundTop !== null && rect.top >= boundTop) return;
                if (rect.width <= 100 || rect.height <= 80) return;
                const bg = window.getComputedStyle(el).backgroundImage;
                if (!bg || bg === 'none' || !bg.includes('url')) return;
                const m = bg.match(/url\(["']?([^"')]+)["']?\)/);
                if (m) add(m[1], rect.width, rect.height, rect.top, 'background', el);
            }};

            const scanPicture = (picture, boundTop) => {{
                const rect = picture.getBoundingClientRect();
                if (boundTop !== null && rect.top >= boundTop) return;
                picture.querySelectorAll('source').forEach((source) => {{
                    if (source.srcset) {{
                        const src = source.srcset.split(',')[0].trim().split(' ')[0];
                        add(src, rect.width, rect.height, rect.top, 'picture', picture);
                    }}
                }});
                const img = picture.querySelector('img');
                if (img) {{
                    const srcs = imgSources(img);
                    if (srcs.length > 0) add(srcs[0], rect.width, rect.height, rect.top, 'picture', picture);
                }}
            }};

            if (scopeSelectors.length > 0) {{
                document.querySelectorAll(scopeSelectors).forEach((container) => {{
                    container.querySelectorAll('img').forEach((img) => scanImg(img, null));
                    scanBackground(container, null);
                }});
            }} else {{
                document.querySelectorAll('img').forEach((img) => scanImg(img, heroHeight));
                document.querySelectorAll('*').forEach((el) => scanBackground(el, heroHeight));
                document.querySelectorAll('picture').forEach((p) => scanPicture(p, heroHeight));
            }}

            return JSON.stringify({{ candidates }});
        }})()
        "#,
        hero_height = cfg.hero_height_px,
        scope = scope,
    )
}

fn dom_source_from(label: &str) -> DomSource {
    match label {
        "background" => DomSource::Background,
        "picture" => DomSource::Picture,
        _ => DomSource::ImgTag,
    }
}

/// Parse the JSON.stringify payload handed back by the scan script.
/// Malformed entries are dropped, never an error.
pub fn parse_dom_candidates(payload: &serde_json::Value) -> Vec<CandidateImage> {
    let parsed: serde_json::Value = match payload {
        serde_json::Value::String(s) => match serde_json::from_str(s) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        },
        other => other.clone(),
    };

    parsed["candidates"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let url = item["url"].as_str()?.to_string();
                    Some(CandidateImage {
                        url,
                        width: item["width"].as_f64().unwrap_or(0.0),
                        height: item["height"].as_f64().unwrap_or(0.0),
                        top_offset: item["top"].as_f64(),
                        dom_source: dom_source_from(item["source"].as_str().unwrap_or("img_tag")),
                        in_recommended_block: item["excluded"].as_bool().unwrap_or(false),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_hint_from_host() {
        assert_eq!(
            site_hint("https://www.redfin.com/WA/Seattle/home/123"),
            SiteHint::Redfin
        );
        assert_eq!(
            site_hint("https://www.zillow.com/homedetails/456_zpid/"),
            SiteHint::Zillow
        );
        assert_eq!(site_hint("https://example.com/listing"), SiteHint::Generic);
        // Lookalike hosts do not get the site strategy.
        assert_eq!(site_hint("https://notredfin.com/home/1"), SiteHint::Generic);
        assert_eq!(site_hint("not a url"), SiteHint::Generic);
    }

    #[test]
    fn generic_sites_skip_structured_tiers() {
        assert_eq!(tiers(SiteHint::Generic), &[Tier::HeroDom]);
        assert_eq!(tiers(SiteHint::Redfin)[0], Tier::Hydration);
    }

    #[test]
    fn hydration_finds_cdn_photos_and_ignores_foreign_hosts() {
        let html = r#"<html><head><script type="application/json">
            {"homeData":{"photos":["https://ssl.cdn-redfin.com/photo/1/bigphoto/1_0.jpg",
                                   "https://ads.tracker.net/p.jpg"]}}
        </script></head><body></body></html>"#;
        let candidates = hydration_candidates(html, SiteHint::Redfin);
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].url,
            "https://ssl.cdn-redfin.com/photo/1/bigphoto/1_0.jpg"
        );
        assert_eq!(candidates[0].dom_source, DomSource::JsonState);
        assert!(candidates[0].top_offset.is_none());
    }

    #[test]
    fn hydration_photos_still_pass_the_non_listing_filter() {
        // A logo hosted on the photo CDN survives extraction but not ranking.
        let html = r#"<script type="application/json">
            {"photos":["https://ssl.cdn-redfin.com/photo/1/bigphoto/1_0.jpg",
                       "https://ssl.cdn-redfin.com/assets/logo.png"]}
        </script>"#;
        let candidates = hydration_candidates(html, SiteHint::Redfin);
        assert_eq!(candidates.len(), 2);
        let ranked = crate::filter::filter_rank(candidates, &FilterConfig::default(), 8);
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].url.contains("bigphoto"));
    }

    #[test]
    fn hydration_reads_url_bearing_photo_objects() {
        let html = r#"<script>window.__INITIAL_STATE__ = {"gallery":{"images":[
            {"url":"https://photos.zillowstatic.com/fp/abc-cc_ft_1536.jpg","caption":"front"},
            {"url":"https://maps.googleapis.com/streetview.jpg"}
        ]}};</script>"#;
        let candidates = hydration_candidates(html, SiteHint::Zillow);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].url.contains("zillowstatic.com"));
    }

    #[test]
    fn hydration_descends_into_stringified_json() {
        let inner = r#"{\"photos\":[\"https://ssl.cdn-redfin.com/photo/2.jpg\"]}"#;
        let html = format!(
            r#"<script type="application/json">{{"dataCache":"{inner}"}}</script>"#
        );
        let candidates = hydration_candidates(&html, SiteHint::Redfin);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn json_walk_depth_is_bounded() {
        let mut doc = r#"{"photos":["https://ssl.cdn-redfin.com/deep.jpg"]}"#.to_string();
        for _ in 0..30 {
            doc = format!(r#"{{"level":{doc}}}"#);
        }
        let html = format!(r#"<script type="application/json">{doc}</script>"#);
        assert!(hydration_candidates(&html, SiteHint::Redfin).is_empty());
    }

    #[test]
    fn scoped_script_carries_site_selectors() {
        let cfg = FilterConfig::default();
        let script = dom_scan_script(SiteHint::Redfin, Tier::ScopedDom, &cfg);
        assert!(script.contains("data-rf-test-id"));
        let unscoped = dom_scan_script(SiteHint::Redfin, Tier::HeroDom, &cfg);
        assert!(!unscoped.contains("data-rf-test-id"));
        assert!(unscoped.contains("const heroHeight = 800"));
    }

    #[test]
    fn parses_scan_payload_from_stringified_json() {
        let payload = serde_json::Value::String(
            r#"{"candidates":[
                {"url":"https://cdn.example/a.jpg","width":640.0,"height":480.0,"top":12.5,"source":"img_tag","excluded":false},
                {"url":"https://cdn.example/bg.jpg","width":800.0,"height":600.0,"top":0.0,"source":"background","excluded":true},
                {"width":10,"height":10}
            ]}"#
            .to_string(),
        );
        let candidates = parse_dom_candidates(&payload);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].top_offset, Some(12.5));
        assert_eq!(candidates[1].dom_source, DomSource::Background);
        assert!(candidates[1].in_recommended_block);
    }

    #[test]
    fn unparseable_payload_yields_zero_candidates() {
        let payload = serde_json::Value::String("not json".to_string());
        assert!(parse_dom_candidates(&payload).is_empty());
        assert!(parse_dom_candidates(&serde_json::Value::Null).is_empty());
    }
}
