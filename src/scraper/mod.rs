pub mod browser;
pub mod cleaner;
pub mod parsers;

use crate::models::{PageError, PageResult};
use tracing::{debug, info, warn};

pub use self::browser::{PageRenderer, WebDriverRenderer};
pub use self::parsers::ListingLayout;

// ── Page worker ───────────────────────────────────────────────────────────────

/// Fetch and extract one page. Never fails: every problem ends up in `PageResult::error`.
pub async fn scrape_page(
    renderer: &dyn PageRenderer,
    layout: &ListingLayout,
    ordinal: u32,
) -> PageResult {
    let url = layout.page_url(ordinal);

    if let Err(e) = url::Url::parse(&url) {
        warn!("Page {}: invalid URL {:?}: {}", ordinal, url, e);
        return PageResult::failed(ordinal, url, PageError::FetchFailure(format!("invalid URL: {}", e)));
    }

    debug!("Rendering page {} ({})", ordinal, url);

    let html = match renderer.render(&url).await {
        Ok(html) => html,
        Err(e @ PageError::RenderTimeout(_)) => {
            info!("Page {} ({}): {}; likely past the last page or slow", ordinal, url, e);
            return PageResult::failed(ordinal, url, e);
        }
        Err(e) => {
            warn!("Page {} ({}): {}", ordinal, url, e);
            return PageResult::failed(ordinal, url, e);
        }
    };

    let products = parsers::parse_listing_page(&html, layout);
    debug!("Page {}: {} products", ordinal, products.len());

    PageResult::ok(ordinal, url, products)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
