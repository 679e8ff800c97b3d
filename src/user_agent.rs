//! Shared User-Agent string for scrape and download HTTP traffic.
//!
//! Single source for the UA format so all requests identify the tool
//! consistently (good citizenship; RFC 9308).

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/mediahaul";

/// Default User-Agent for all HTTP requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("mediahaul/{version} (media-archival-tool; +{PROJECT_UA_URL})")
}
