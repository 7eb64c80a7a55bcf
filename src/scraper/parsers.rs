use crate::config::ScraperConfig;
use crate::models::ProductRecord;
use anyhow::Result;
use scraper::{ElementRef, Html, Selector};
use tracing::trace;

use super::cleaner::{non_empty, normalize_price};

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("selector {:?}: {:?}", css, e))
}

// ── Selectors ─────────────────────────────────────────────────────────────────

/// Per-product selectors for the Magento-style listing markup.
#[derive(Debug, Clone)]
pub struct ProductSelectors {
    name_link: Selector,
    price_box: Selector,
    old_price: Selector,
    special_price: Selector,
    regular_price: Selector,
}

impl ProductSelectors {
    pub fn new() -> Result<Self> {
        Ok(Self {
            name_link: selector("h2.product-name a")?,
            price_box: selector("div.price-box")?,
            old_price: selector("p.old-price span.price")?,
            special_price: selector("p.special-price span.price")?,
            regular_price: selector("span.regular-price span.price")?,
        })
    }
}

/// Everything a worker needs to turn a page ordinal into products.
/// Compiled once before dispatch; invalid selectors stop the run there.
#[derive(Debug, Clone)]
pub struct ListingLayout {
    pub url_template: String,
    pub category: String,
    container: Selector,
    item: Selector,
    product: ProductSelectors,
}

impl ListingLayout {
    pub fn compile(config: &ScraperConfig) -> Result<Self> {
        Ok(Self {
            url_template: config.url_template.clone(),
            category: config.category.clone(),
            container: selector(&config.container_selector)?,
            item: selector(&config.item_selector)?,
            product: ProductSelectors::new()?,
        })
    }

    /// Substitute the ordinal into the URL template.
    pub fn page_url(&self, ordinal: u32) -> String {
        self.url_template.replace("{page}", &ordinal.to_string())
    }
}

// ── Page ──────────────────────────────────────────────────────────────────────

/// Extract every valid product from a rendered listing page, in document order.
/// A page without the container yields nothing.
pub fn parse_listing_page(html: &str, layout: &ListingLayout) -> Vec<ProductRecord> {
    let doc = Html::parse_document(html);

    let Some(container) = doc.select(&layout.container).next() else {
        return Vec::new();
    };

    container
        .select(&layout.item)
        .filter_map(|item| extract_product(item, &layout.product, &layout.category))
        .collect()
}

// ── Product ───────────────────────────────────────────────────────────────────

fn element_text(el: ElementRef<'_>) -> String {
    el.text().map(str::trim).collect::<String>()
}

/// Map one product node to a record, or `None` when name or current price is missing.
pub fn extract_product(
    item: ElementRef<'_>,
    sel: &ProductSelectors,
    category: &str,
) -> Option<ProductRecord> {
    let product_id = item.value().attr("data-product-id").and_then(non_empty);

    let name = item.select(&sel.name_link).next().and_then(|a| {
        a.value()
            .attr("title")
            .and_then(non_empty)
            .or_else(|| non_empty(&element_text(a)))
    });

    let mut price_before = None;
    let mut price_now = None;

    if let Some(price_box) = item.select(&sel.price_box).next() {
        price_before = price_box
            .select(&sel.old_price)
            .next()
            .and_then(|el| normalize_price(&element_text(el)));

        let current = price_box
            .select(&sel.special_price)
            .next()
            .or_else(|| price_box.select(&sel.regular_price).next());
        price_now = current.and_then(|el| normalize_price(&element_text(el)));
    }

    let (Some(name), Some(now)) = (name, price_now) else {
        trace!("Skipping product node {:?}: missing name or price", product_id);
        return None;
    };

    let before = price_before.unwrap_or(now);

    Some(ProductRecord {
        name: Some(name),
        category: category.to_string(),
        price_before: Some(before),
        price_now: Some(now),
        on_promotion: now < before,
        measurements: None,
        product_id,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Listing markup in the shape the site renders.
    pub(crate) fn listing_html(items: &[&str]) -> String {
        format!(
            "<html><body><section class=\"category-products\"><ul>{}</ul></section></body></html>",
            items.concat()
        )
    }

    pub(crate) fn promo_item(id: &str, name: &str, old: &str, special: &str) -> String {
        format!(
            r#"<li class="item" data-product-id="{id}">
                 <h2 class="product-name"><a href="/p/{id}" title="{name}">{name}</a></h2>
                 <div class="price-box">
                   <p class="old-price"><span class="price">{old}</span></p>
                   <p class="special-price"><span class="price">{special}</span></p>
                 </div>
               </li>"#
        )
    }

    pub(crate) fn regular_item(id: &str, name: &str, price: &str) -> String {
        format!(
            r#"<li class="item" data-product-id="{id}">
                 <h2 class="product-name"><a href="/p/{id}">{name}</a></h2>
                 <div class="price-box">
                   <span class="regular-price"><span class="price">{price}</span></span>
                 </div>
               </li>"#
        )
    }

    fn layout() -> ListingLayout {
        ListingLayout::compile(&ScraperConfig::default()).unwrap()
    }

    #[test]
    fn test_promotional_product() {
        let html = listing_html(&[&promo_item("42", "Granola Tradicional 1kg", "R$ 39,90", "R$ 29,90")]);
        let products = parse_listing_page(&html, &layout());

        assert_eq!(products.len(), 1);
        let p = &products[0];
        assert_eq!(p.name.as_deref(), Some("Granola Tradicional 1kg"));
        assert_eq!(p.product_id.as_deref(), Some("42"));
        assert_eq!(p.price_before, Some(39.90));
        assert_eq!(p.price_now, Some(29.90));
        assert!(p.on_promotion);
        assert_eq!(p.category, "Natural Products");
    }

    #[test]
    fn test_regular_price_only() {
        let html = listing_html(&[&regular_item("7", "Chia 500g", "R$ 18,50")]);
        let products = parse_listing_page(&html, &layout());

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].price_before, products[0].price_now);
        assert_eq!(products[0].price_now, Some(18.50));
        assert!(!products[0].on_promotion);
        assert_eq!(products[0].promotion_flag(), 0);
    }

    #[test]
    fn test_title_attribute_wins_over_text() {
        let html = listing_html(&[r#"<li class="item">
            <h2 class="product-name"><a title="Full Name 250g">Full Na...</a></h2>
            <div class="price-box"><span class="regular-price"><span class="price">10,00</span></span></div>
        </li>"#]);
        let products = parse_listing_page(&html, &layout());
        assert_eq!(products[0].name.as_deref(), Some("Full Name 250g"));
        assert_eq!(products[0].product_id, None);
    }

    #[test]
    fn test_text_split_across_nodes_is_trimmed_per_piece() {
        let html = listing_html(&[r#"<li class="item">
            <h2 class="product-name"><a href="/p/9">
                <strong>Mel Silvestre</strong>
            </a></h2>
            <div class="price-box"><span class="regular-price"><span class="price">
                R$ <b>12,90</b>
            </span></span></div>
        </li>"#]);
        let products = parse_listing_page(&html, &layout());

        assert_eq!(products[0].name.as_deref(), Some("Mel Silvestre"));
        assert_eq!(products[0].price_now, Some(12.90));
    }

    #[test]
    fn test_rejects_missing_name_or_price() {
        let no_name = r#"<li class="item" data-product-id="1">
            <div class="price-box"><span class="regular-price"><span class="price">10,00</span></span></div>
        </li>"#;
        let no_price = r#"<li class="item" data-product-id="2">
            <h2 class="product-name"><a title="Oats">Oats</a></h2>
            <div class="price-box"><span class="regular-price"><span class="price">Esgotado</span></span></div>
        </li>"#;
        let html = listing_html(&[no_name, no_price, &regular_item("3", "Kept", "5,00")]);
        let products = parse_listing_page(&html, &layout());

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].product_id.as_deref(), Some("3"));
    }

    #[test]
    fn test_missing_container_yields_nothing() {
        let html = "<html><body><ul><li class=\"item\">stray</li></ul></body></html>";
        assert!(parse_listing_page(html, &layout()).is_empty());
    }

    #[test]
    fn test_page_url_and_bad_selector() {
        assert_eq!(
            layout().page_url(3),
            "https://www.emporiorosa.com.br/produtos-naturais-1.html?p=3"
        );

        let config = ScraperConfig { item_selector: "li[".to_string(), ..Default::default() };
        assert!(ListingLayout::compile(&config).is_err());
    }
}
