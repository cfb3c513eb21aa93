use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::FilterConfig;
use crate::extract::{CandidateImage, DomSource};

/// URL fragments that mark an image as site chrome rather than a listing
/// photo. Case-insensitive substring match.
static NON_LISTING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)logo|icon|avatar|agent|headshot|map|sprite|placeholder|pixel|favicon|spacer|badge")
        .unwrap()
});

/// A candidate that survived filtering, in its final rank position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RankedImage {
    pub url: String,
    pub width: f64,
    pub height: f64,
    pub top_position: f64,
    pub source: DomSource,
}

fn is_non_listing(url: &str) -> bool {
    url.starts_with("data:") || NON_LISTING_RE.is_match(url)
}

fn area(c: &CandidateImage) -> f64 {
    c.width * c.height
}

/// Filter, dedup, rank and truncate raw candidates. Pure and deterministic;
/// malformed candidates are dropped, never an error.
///
/// Order: ascending top offset, ties and offset-less candidates (JSON-sourced
/// URLs carry no layout) broken by descending pixel area.
pub fn filter_rank(
    candidates: Vec<CandidateImage>,
    cfg: &FilterConfig,
    max_images: usize,
) -> Vec<RankedImage> {
    let mut seen = std::collections::HashSet::new();
    let mut kept: Vec<CandidateImage> = candidates
        .into_iter()
        .filter(|c| c.url.starts_with("http"))
        .filter(|c| !is_non_listing(&c.url))
        .filter(|c| !c.in_recommended_block)
        .filter(|c| {
            // Size gate only applies when layout is known; hydration URLs
            // arrive with no box at all.
            let known = c.width > 0.0 && c.height > 0.0;
            !known || (c.width >= cfg.min_image_width && c.height >= cfg.min_image_height)
        })
        // Keep-first dedup: traversal order puts the topmost instance first.
        .filter(|c| seen.insert(c.url.clone()))
        .collect();

    // Offset is the primary key; offset-less candidates sink below every
    // known offset as one group. Area desc settles ties within either group,
    // keeping the comparator a total order.
    kept.sort_by(|a, b| {
        let ka = a.top_offset.unwrap_or(f64::INFINITY);
        let kb = b.top_offset.unwrap_or(f64::INFINITY);
        ka.total_cmp(&kb).then_with(|| area(b).total_cmp(&area(a)))
    });

    kept.into_iter()
        .take(max_images)
        .map(|c| RankedImage {
            url: c.url,
            width: c.width,
            height: c.height,
            top_position: c.top_offset.unwrap_or(0.0),
            source: c.dom_source,
        })
        .collect()
}
