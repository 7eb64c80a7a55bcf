pub mod postgres;

use crate::config::{StorageBackend, StorageConfig};
use crate::models::RankedProduct;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use duckdb::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use self::postgres::{PostgresSettings, PostgresSink};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database settings incomplete, missing: {}", .0.join(", "))]
    ConfigurationIncomplete(Vec<String>),

    #[error("credential file {path}: {message}")]
    CredentialFile { path: String, message: String },

    #[error("bulk insert into {target} failed: {message}")]
    Persistence { target: String, message: String },
}

// ── Sink trait ────────────────────────────────────────────────────────────────

/// Destination for the ranked product set. Writes append; nothing is deduplicated.
#[async_trait]
pub trait ProductSink: Send + Sync {
    /// Human-readable destination, e.g. `duckdb:product_prices`.
    fn describe(&self) -> String;

    /// Create the destination table if it does not exist.
    async fn ensure_schema(&self) -> Result<()>;

    /// Insert every record as one unit, chunked. Returns rows written.
    async fn write(&self, products: &[RankedProduct]) -> Result<usize>;
}

/// Write the ranked products, never failing the caller.
///
/// An empty set or a disabled sink writes nothing. A failed write is logged and
/// reported as 0 rows.
pub async fn persist(sink: Option<&dyn ProductSink>, products: &[RankedProduct]) -> usize {
    if products.is_empty() {
        info!("No products extracted; nothing to persist");
        return 0;
    }

    let Some(sink) = sink else {
        warn!("Persistence disabled; {} products were not saved", products.len());
        return 0;
    };

    info!("Saving {} products to {}", products.len(), sink.describe());
    match sink.write(products).await {
        Ok(n) => {
            info!("Saved {} rows to {}", n, sink.describe());
            n
        }
        Err(e) => {
            let err = SinkError::Persistence { target: sink.describe(), message: format!("{:#}", e) };
            error!("{}", err);
            0
        }
    }
}

/// Build the configured sink. `Ok(None)` means persistence is disabled for this run.
pub async fn open_sink(config: &StorageConfig) -> Result<Option<Box<dyn ProductSink>>> {
    let sink: Box<dyn ProductSink> = match config.backend {
        StorageBackend::Duckdb => match DuckDbSink::open(&config.db_path, config) {
            Ok(sink) => Box::new(sink),
            Err(e) => {
                warn!("Could not open DuckDB store ({:#}); continuing without persistence", e);
                return Ok(None);
            }
        },
        StorageBackend::Postgres => {
            let settings = match PostgresSettings::resolve(config) {
                Ok(s) => s,
                Err(e) if config.require_credentials => {
                    return Err(e).context("Database credentials are required");
                }
                Err(e) => {
                    warn!("{}; continuing without persistence", e);
                    return Ok(None);
                }
            };
            match PostgresSink::connect(&settings, config).await {
                Ok(sink) => Box::new(sink),
                Err(e) => {
                    warn!("Could not connect to Postgres ({:#}); continuing without persistence", e);
                    return Ok(None);
                }
            }
        }
    };

    if config.run_migrations {
        if let Err(e) = sink.ensure_schema().await {
            warn!("Schema setup on {} failed ({:#}); continuing without persistence", sink.describe(), e);
            return Ok(None);
        }
    }

    Ok(Some(sink))
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub(crate) fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    anyhow::ensure!(valid, "Invalid SQL identifier {:?}", name);
    Ok(())
}

// ── DuckDB ────────────────────────────────────────────────────────────────────

pub struct DuckDbSink {
    conn: Mutex<Connection>,
    table: String,
    batch_size: usize,
}

impl DuckDbSink {
    pub fn open(path: &Path, config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Self::with_connection(conn, config)
    }

    pub fn open_in_memory(config: &StorageConfig) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, config)
    }

    fn with_connection(conn: Connection, config: &StorageConfig) -> Result<Self> {
        check_identifier(&config.table_name)?;
        Ok(Self {
            conn: Mutex::new(conn),
            table: config.table_name.clone(),
            batch_size: config.batch_size.max(1),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow::anyhow!("DuckDB connection lock poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let t = &self.table;
        let ddl = format!(
            r#"
            CREATE SEQUENCE IF NOT EXISTS {t}_id_seq;
            CREATE TABLE IF NOT EXISTS {t} (
                id            BIGINT PRIMARY KEY DEFAULT nextval('{t}_id_seq'),
                name          VARCHAR(500),
                category      VARCHAR(100),
                price_before  DECIMAL(18, 2),
                price_now     DECIMAL(18, 2),
                promotion_flag SMALLINT,
                measurements  VARCHAR(100),
                global_rank   INTEGER,
                product_id    VARCHAR(100),
                extracted_at  TIMESTAMP
            );
            "#
        );
        self.lock()?.execute_batch(&ddl).context("DDL failed")?;
        info!("Migrations done.");
        Ok(())
    }

    fn insert_all(&self, products: &[RankedProduct]) -> Result<usize> {
        let sql = format!(
            "INSERT INTO {} (name, category, price_before, price_now, promotion_flag, \
             measurements, global_rank, product_id, extracted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for (i, chunk) in products.chunks(self.batch_size).enumerate() {
                for p in chunk {
                    stmt.execute(params![
                        p.record.name,
                        p.record.category,
                        p.record.price_before,
                        p.record.price_now,
                        p.record.promotion_flag(),
                        p.record.measurements,
                        i64::from(p.global_rank),
                        p.record.product_id,
                        p.extracted_at,
                    ])
                    .with_context(|| format!("insert rank {}", p.global_rank))?;
                }
                debug!("Chunk {}: {} rows staged", i + 1, chunk.len());
            }
        }
        tx.commit()?;
        Ok(products.len())
    }

    pub fn row_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        let n = conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |r| r.get(0))?;
        Ok(n)
    }

    /// Number of distinct extraction runs and the latest one.
    pub fn extraction_range(&self) -> Result<(i64, Option<NaiveDateTime>)> {
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(DISTINCT extracted_at), MAX(extracted_at) FROM {}", self.table);
        Ok(conn.query_row(&sql, [], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    #[cfg(test)]
    pub(crate) fn ranks(&self) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT global_rank FROM {} ORDER BY id", self.table))?;
        let ranks = stmt.query_map([], |r| r.get(0))?.collect::<Result<Vec<i64>, _>>()?;
        Ok(ranks)
    }

    #[cfg(test)]
    pub(crate) fn product_ids(&self) -> Result<Vec<Option<String>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT product_id FROM {} ORDER BY global_rank", self.table))?;
        let ids = stmt.query_map([], |r| r.get(0))?.collect::<Result<Vec<Option<String>>, _>>()?;
        Ok(ids)
    }
}

#[async_trait]
impl ProductSink for DuckDbSink {
    fn describe(&self) -> String {
        format!("duckdb:{}", self.table)
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()
    }

    async fn write(&self, products: &[RankedProduct]) -> Result<usize> {
        if products.is_empty() {
            return Ok(0);
        }
        self.insert_all(products)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ProductRecord;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn ranked(rank: u32, name: &str, now: f64, before: f64) -> RankedProduct {
        RankedProduct {
            global_rank: rank,
            extracted_at: NaiveDate::from_ymd_opt(2026, 10, 19)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
            record: ProductRecord {
                name: Some(name.to_string()),
                category: "Natural Products".to_string(),
                price_before: Some(before),
                price_now: Some(now),
                on_promotion: now < before,
                measurements: None,
                product_id: Some(format!("id-{}", rank)),
            },
        }
    }

    /// Counts calls; optionally fails every write.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) writes: AtomicUsize,
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl ProductSink for RecordingSink {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        async fn ensure_schema(&self) -> Result<()> {
            Ok(())
        }

        async fn write(&self, products: &[RankedProduct]) -> Result<usize> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            anyhow::ensure!(!self.fail, "connection reset");
            Ok(products.len())
        }
    }

    fn memory_sink(batch_size: usize) -> DuckDbSink {
        let config = StorageConfig { batch_size, ..Default::default() };
        let sink = DuckDbSink::open_in_memory(&config).unwrap();
        sink.run_migrations().unwrap();
        sink
    }

    #[tokio::test]
    async fn test_duckdb_chunked_insert() {
        let sink = memory_sink(2);
        let products: Vec<_> = (1..=5).map(|r| ranked(r, "Castanha", 10.0, 12.5)).collect();

        assert_eq!(sink.write(&products).await.unwrap(), 5);
        assert_eq!(sink.row_count().unwrap(), 5);
        assert_eq!(sink.ranks().unwrap(), vec![1, 2, 3, 4, 5]);

        let (runs, latest) = sink.extraction_range().unwrap();
        assert_eq!(runs, 1);
        assert_eq!(latest, Some(products[0].extracted_at));
    }

    #[test]
    fn test_append_is_not_idempotent() {
        let sink = memory_sink(1000);
        let products = vec![ranked(1, "Aveia", 9.9, 9.9), ranked(2, "Mel", 20.0, 24.0)];

        let first = tokio_test::block_on(persist(Some(&sink), &products));
        let second = tokio_test::block_on(persist(Some(&sink), &products));

        assert_eq!((first, second), (2, 2));
        assert_eq!(sink.row_count().unwrap(), 4);
        assert_eq!(sink.ranks().unwrap(), vec![1, 2, 1, 2]);
    }

    #[tokio::test]
    async fn test_persist_skips_empty_and_disabled() {
        let sink = RecordingSink::default();
        assert_eq!(persist(Some(&sink), &[]).await, 0);
        assert_eq!(sink.writes.load(Ordering::SeqCst), 0);

        assert_eq!(persist(None, &[ranked(1, "Chia", 5.0, 5.0)]).await, 0);
    }

    #[tokio::test]
    async fn test_persist_reports_failure_as_zero() {
        let sink = RecordingSink { fail: true, ..Default::default() };
        assert_eq!(persist(Some(&sink), &[ranked(1, "Chia", 5.0, 5.0)]).await, 0);
        assert_eq!(sink.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_write_reports_zero() {
        let sink = memory_sink(1000);
        let products = vec![ranked(1, "Aveia", 9.9, 9.9)];
        sink.lock().unwrap().execute_batch("DROP TABLE product_prices").unwrap();

        assert_eq!(persist(Some(&sink), &products).await, 0);
    }

    #[tokio::test]
    async fn test_unopenable_duckdb_disables_persistence() {
        let config = StorageConfig {
            db_path: "/dev/null/nested/products.duckdb".into(),
            ..Default::default()
        };
        assert!(matches!(open_sink(&config).await, Ok(None)));

        let dir = tempfile::tempdir().unwrap();
        let bad_table = StorageConfig {
            db_path: dir.path().join("products.duckdb"),
            table_name: "prices; DROP".to_string(),
            ..Default::default()
        };
        assert!(matches!(open_sink(&bad_table).await, Ok(None)));
    }

    fn postgres_without_credentials(require_credentials: bool) -> StorageConfig {
        StorageConfig {
            backend: StorageBackend::Postgres,
            credentials_file: Some("/nonexistent/db-credentials.json".into()),
            require_credentials,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_disable_persistence() {
        let outcome = open_sink(&postgres_without_credentials(false)).await;
        assert!(matches!(outcome, Ok(None)));
    }

    #[tokio::test]
    async fn test_required_credentials_abort() {
        let outcome = open_sink(&postgres_without_credentials(true)).await;
        assert!(outcome.is_err());
    }

    #[test]
    fn test_check_identifier() {
        assert!(check_identifier("product_prices").is_ok());
        assert!(check_identifier("prices; DROP TABLE x").is_err());
        assert!(check_identifier("1prices").is_err());
        assert!(check_identifier("").is_err());
    }
}
