//! Pipeline orchestrator: scraper → ranking → storage.
//!
//! 1. Fan page ordinals 1..=N out to a bounded pool of workers, each with its own
//!    browser session. Results come back in completion order.
//! 2. Sort by ordinal and assign global ranks (see [`ranking`]).
//! 3. Bulk-append the ranked products to the sink.
//!
//! A fixed page count is always scraped; no early stop on empty pages, no retries.

pub mod ranking;

use crate::config::{AppConfig, PipelineConfig};
use crate::models::{PageError, PageResult};
use crate::scraper::{scrape_page, ListingLayout, PageRenderer, WebDriverRenderer};
use crate::storage::{self, ProductSink};
use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

// ── Progress ──────────────────────────────────────────────────────────────────

/// Sees every page result as it arrives, in completion order.
pub trait ProgressObserver: Send {
    fn on_start(&mut self, _total: usize) {}
    fn on_page(&mut self, result: &PageResult);
    fn on_finish(&mut self) {}
}

fn log_page(result: &PageResult) {
    match &result.error {
        Some(e) => warn!("Page {} ({}) failed: {}", result.page_ordinal, result.source_url, e),
        None if result.products.is_empty() => info!(
            "Page {} ({}) returned no products; possible end of pagination",
            result.page_ordinal, result.source_url
        ),
        None => info!("Page {}: {} products", result.page_ordinal, result.products.len()),
    }
}

/// Log-only observer.
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_page(&mut self, result: &PageResult) {
        log_page(result);
    }
}

/// Terminal progress bar for interactive runs.
pub struct BarObserver {
    bar: ProgressBar,
}

impl BarObserver {
    pub fn new() -> Self {
        Self { bar: ProgressBar::hidden() }
    }
}

impl ProgressObserver for BarObserver {
    fn on_start(&mut self, total: usize) {
        self.bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} pages ({eta})")
        {
            self.bar.set_style(style.progress_chars("=> "));
        }
    }

    fn on_page(&mut self, result: &PageResult) {
        self.bar.suspend(|| log_page(result));
        self.bar.inc(1);
    }

    fn on_finish(&mut self) {
        self.bar.finish_and_clear();
    }
}

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Dispatches page ordinals over a bounded worker pool and gathers one result per ordinal.
pub struct Coordinator {
    renderer: Arc<dyn PageRenderer>,
    layout: Arc<ListingLayout>,
    max_pages: u32,
    concurrency: usize,
}

impl Coordinator {
    pub fn new(renderer: Arc<dyn PageRenderer>, layout: Arc<ListingLayout>, config: &PipelineConfig) -> Self {
        Self {
            renderer,
            layout,
            max_pages: config.max_pages,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Scrape every ordinal. Returns exactly `max_pages` results in completion order.
    pub async fn collect(&self, observer: &mut dyn ProgressObserver) -> Vec<PageResult> {
        let total = self.max_pages as usize;
        observer.on_start(total);

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::channel::<PageResult>(self.concurrency * 2);

        for ordinal in 1..=self.max_pages {
            let renderer = Arc::clone(&self.renderer);
            let layout = Arc::clone(&self.layout);
            let sem = Arc::clone(&sem);
            let tx = tx.clone();

            tokio::spawn(async move {
                let url = layout.page_url(ordinal);

                let result = match sem.acquire_owned().await {
                    Ok(_permit) => {
                        // Separate task so a panicking worker still yields a result here.
                        let worker = tokio::spawn(async move {
                            scrape_page(renderer.as_ref(), &layout, ordinal).await
                        });
                        match worker.await {
                            Ok(result) => result,
                            Err(e) => {
                                error!("Worker for page {} died: {}", ordinal, e);
                                PageResult::failed(ordinal, url, PageError::WorkerLost(e.to_string()))
                            }
                        }
                    }
                    Err(e) => PageResult::failed(ordinal, url, PageError::WorkerLost(e.to_string())),
                };

                let _ = tx.send(result).await;
            });
        }

        // Drop our copy of tx so rx closes when all dispatch tasks finish
        drop(tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = rx.recv().await {
            observer.on_page(&result);
            results.push(result);
        }

        let seen: HashSet<u32> = results.iter().map(|r| r.page_ordinal).collect();
        for ordinal in (1..=self.max_pages).filter(|o| !seen.contains(o)) {
            let lost = PageResult::failed(
                ordinal,
                self.layout.page_url(ordinal),
                PageError::WorkerLost("no result reported".to_string()),
            );
            observer.on_page(&lost);
            results.push(lost);
        }

        observer.on_finish();
        results
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Full run against a live WebDriver endpoint.
    pub async fn run(
        &self,
        sink: Option<&dyn ProductSink>,
        observer: &mut dyn ProgressObserver,
    ) -> Result<RunSummary> {
        let renderer = Arc::new(WebDriverRenderer::new(&self.config.scraper));
        self.run_with(renderer, sink, observer).await
    }

    pub async fn run_with(
        &self,
        renderer: Arc<dyn PageRenderer>,
        sink: Option<&dyn ProductSink>,
        observer: &mut dyn ProgressObserver,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let layout = Arc::new(
            ListingLayout::compile(&self.config.scraper).context("Invalid listing selectors")?,
        );
        let coordinator = Coordinator::new(renderer, layout, &self.config.pipeline);

        // ── 1. Scrape all pages ───────────────────────────────────────────────
        info!(
            "=== Step 1: Scraping {} pages with {} workers ===",
            self.config.pipeline.max_pages, coordinator.concurrency
        );
        let pages = coordinator.collect(observer).await;

        // ── 2. Restore order and rank ─────────────────────────────────────────
        let run = ranking::assemble(pages, Utc::now().naive_utc());
        info!(
            "=== Step 2: Ranked {} products from {} pages with data ===",
            run.products.len(),
            run.pages_with_data
        );

        // ── 3. Persist ────────────────────────────────────────────────────────
        info!("=== Step 3: Persisting ===");
        let rows_persisted = storage::persist(sink, &run.products).await;

        Ok(RunSummary {
            pages_attempted: run.pages_attempted,
            pages_with_data: run.pages_with_data,
            pages_with_error: run.pages_with_error,
            products_extracted: run.products.len(),
            rows_persisted,
            elapsed: started.elapsed(),
        })
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub pages_attempted: usize,
    pub pages_with_data: usize,
    pub pages_with_error: usize,
    pub products_extracted: usize,
    pub rows_persisted: usize,
    pub elapsed: Duration,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
