use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Listing site + browser session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// Listing URL with a `{page}` placeholder for the 1-based page ordinal.
    #[serde(default = "default_url_template")]
    pub url_template: String,

    #[serde(default = "default_container_selector")]
    pub container_selector: String,

    #[serde(default = "default_item_selector")]
    pub item_selector: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// chromedriver (or any W3C WebDriver) endpoint.
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    #[serde(default = "default_render_timeout_secs")]
    pub render_timeout_secs: u64,

    #[serde(default = "default_page_load_delay_ms")]
    pub page_load_delay_ms: u64,

    #[serde(default = "default_scroll_pause_ms")]
    pub scroll_pause_ms: u64,

    /// The site exposes a single category feed, so every record gets this label.
    #[serde(default = "default_category")]
    pub category: String,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Duckdb,
    Postgres,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Postgres schema; ignored by DuckDB.
    #[serde(default = "default_schema")]
    pub schema: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_true")]
    pub run_migrations: bool,

    /// JSON credential file for the Postgres backend.
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Abort before scraping when Postgres credentials cannot be resolved.
    #[serde(default)]
    pub require_credentials: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_url_template() -> String {
    "https://www.emporiorosa.com.br/produtos-naturais-1.html?p={page}".to_string()
}
fn default_container_selector() -> String {
    "section.category-products".to_string()
}
fn default_item_selector() -> String {
    "li.item".to_string()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}
fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}
fn default_window_width() -> u32 {
    1920
}
fn default_window_height() -> u32 {
    1080
}
fn default_render_timeout_secs() -> u64 {
    20
}
fn default_page_load_delay_ms() -> u64 {
    3000
}
fn default_scroll_pause_ms() -> u64 {
    1000
}
fn default_category() -> String {
    "Natural Products".to_string()
}
fn default_max_pages() -> u32 {
    30
}
fn default_concurrency() -> usize {
    8
}
fn default_backend() -> StorageBackend {
    StorageBackend::Duckdb
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/products.duckdb")
}
fn default_table_name() -> String {
    "product_prices".to_string()
}
fn default_schema() -> String {
    "public".to_string()
}
fn default_batch_size() -> usize {
    1000
}
fn default_true() -> bool {
    true
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
            container_selector: default_container_selector(),
            item_selector: default_item_selector(),
            user_agent: default_user_agent(),
            webdriver_url: default_webdriver_url(),
            headless: true,
            window_width: default_window_width(),
            window_height: default_window_height(),
            render_timeout_secs: default_render_timeout_secs(),
            page_load_delay_ms: default_page_load_delay_ms(),
            scroll_pause_ms: default_scroll_pause_ms(),
            category: default_category(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: default_db_path(),
            table_name: default_table_name(),
            schema: default_schema(),
            batch_size: default_batch_size(),
            run_migrations: true,
            credentials_file: None,
            require_credentials: false,
        }
    }
}

impl ScraperConfig {
    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn page_load_delay(&self) -> Duration {
        Duration::from_millis(self.page_load_delay_ms)
    }

    pub fn scroll_pause(&self) -> Duration {
        Duration::from_millis(self.scroll_pause_ms)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("STOREFRONT").separator("__"))
            .build()?;

        let app_cfg = cfg.try_deserialize().unwrap_or_else(|e| {
            warn!("Invalid configuration ({}), falling back to defaults", e);
            AppConfig::default()
        });
        Ok(app_cfg)
    }
}
