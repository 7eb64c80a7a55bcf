//! Restores page order after the unordered fan-in and numbers every product.

use crate::models::{PageResult, RankedProduct};
use chrono::NaiveDateTime;

/// Products of one run in final order, with page counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeRun {
    pub products: Vec<RankedProduct>,
    pub pages_attempted: usize,
    pub pages_with_data: usize,
    pub pages_with_error: usize,
}

/// Sort pages by ordinal, then rank products 1..=K in ordinal-then-page order.
///
/// The output depends only on the set of results, not on the order they
/// arrived in. Every product shares the run-wide `extracted_at`.
pub fn assemble(mut pages: Vec<PageResult>, extracted_at: NaiveDateTime) -> ScrapeRun {
    pages.sort_by_key(|p| p.page_ordinal);

    let pages_attempted = pages.len();
    let pages_with_data = pages.iter().filter(|p| p.has_data()).count();
    let pages_with_error = pages.iter().filter(|p| p.error.is_some()).count();

    let products = pages
        .into_iter()
        .flat_map(|page| page.products)
        .zip(1u32..)
        .map(|(record, global_rank)| RankedProduct { global_rank, extracted_at, record })
        .collect();

    ScrapeRun { products, pages_attempted, pages_with_data, pages_with_error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PageError, ProductRecord};
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn product(page: u32, idx: usize) -> ProductRecord {
        ProductRecord {
            name: Some(format!("p{}-{}", page, idx)),
            category: "Natural Products".to_string(),
            price_before: Some(10.0),
            price_now: Some(10.0),
            on_promotion: false,
            measurements: None,
            product_id: None,
        }
    }

    fn page(ordinal: u32, count: usize) -> PageResult {
        let url = format!("https://shop.test/?p={}", ordinal);
        if count == 0 {
            return PageResult::failed(ordinal, url, PageError::RenderTimeout(20));
        }
        PageResult::ok(ordinal, url, (0..count).map(|i| product(ordinal, i)).collect())
    }

    #[test]
    fn test_ranks_follow_ordinal_then_position() {
        let run = assemble(vec![page(3, 1), page(1, 2), page(2, 0)], ts());

        let ranked: Vec<_> = run
            .products
            .iter()
            .map(|p| (p.global_rank, p.record.name.clone().unwrap()))
            .collect();
        assert_eq!(
            ranked,
            vec![(1, "p1-0".to_string()), (2, "p1-1".to_string()), (3, "p3-0".to_string())]
        );
        assert_eq!(run.pages_attempted, 3);
        assert_eq!(run.pages_with_data, 2);
        assert_eq!(run.pages_with_error, 1);
        assert!(run.products.iter().all(|p| p.extracted_at == ts()));
    }

    #[test]
    fn test_empty_pages_without_error_are_neither_data_nor_error() {
        let empty = PageResult::ok(1, "https://shop.test/?p=1".to_string(), Vec::new());
        let run = assemble(vec![empty], ts());
        assert!(run.products.is_empty());
        assert_eq!((run.pages_with_data, run.pages_with_error), (0, 0));
    }

    fn pages_strategy() -> impl Strategy<Value = Vec<PageResult>> {
        prop::collection::vec(0usize..5, 1..12).prop_map(|counts| {
            counts
                .into_iter()
                .enumerate()
                .map(|(i, n)| page(i as u32 + 1, n))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_arrival_order_does_not_matter(
            (pages, shuffled) in pages_strategy()
                .prop_flat_map(|pages| (Just(pages.clone()), Just(pages).prop_shuffle()))
        ) {
            let expected = assemble(pages, ts());
            let actual = assemble(shuffled, ts());
            prop_assert_eq!(&expected, &actual);

            let ranks: Vec<u32> = actual.products.iter().map(|p| p.global_rank).collect();
            let contiguous: Vec<u32> = (1..=actual.products.len() as u32).collect();
            prop_assert_eq!(ranks, contiguous);
        }
    }
}
