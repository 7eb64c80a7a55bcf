//! Postgres backend: credentials from a JSON file or `DB_*` environment variables,
//! multi-row inserts per chunk inside one transaction.

use crate::config::StorageConfig;
use crate::models::RankedProduct;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{check_identifier, ProductSink, SinkError};

// ── Credentials ───────────────────────────────────────────────────────────────

/// Optional JSON credential file; any key it sets wins over the environment.
#[derive(Debug, Default, Deserialize)]
struct CredentialFile {
    server: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
    schema: Option<String>,
}

impl CredentialFile {
    fn read(path: &Path) -> Result<Self, SinkError> {
        let to_err = |message: String| SinkError::CredentialFile {
            path: path.display().to_string(),
            message,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| to_err(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| to_err(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub schema: String,
}

impl PostgresSettings {
    pub fn resolve(config: &StorageConfig) -> Result<Self, SinkError> {
        let file = match &config.credentials_file {
            Some(path) => CredentialFile::read(path)?,
            None => CredentialFile::default(),
        };
        Self::from_sources(file, &config.schema, |key| std::env::var(key).ok())
    }

    fn from_sources(
        file: CredentialFile,
        default_schema: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SinkError> {
        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        // DB_HOST may carry the database as "host/dbname".
        let (host, db_from_host) = match file.server.or_else(|| lookup("DB_HOST")) {
            Some(h) => match h.split_once('/') {
                Some((host, db)) if !db.is_empty() => (Some(host.to_string()), Some(db.to_string())),
                Some((host, _)) => (Some(host.to_string()), None),
                None => (Some(h), None),
            },
            None => (None, None),
        };

        let port = file.port.or_else(|| lookup("DB_PORT").and_then(|p| p.trim().parse().ok()));
        let database = file.database.or(db_from_host).or_else(|| lookup("DB_NAME"));
        let user = file.user.or_else(|| lookup("DB_USER"));
        let password = file.password.or_else(|| lookup("DB_PASSWORD"));
        let schema = file
            .schema
            .or_else(|| lookup("DB_SCHEMA"))
            .unwrap_or_else(|| default_schema.to_string());

        match (host, port, database, user, password) {
            (Some(host), Some(port), Some(database), Some(user), Some(password)) => {
                Ok(Self { host, port, database, user, password, schema })
            }
            (host, port, database, user, password) => {
                let missing = [
                    ("DB_HOST", host.is_none()),
                    ("DB_PORT", port.is_none()),
                    ("DB_NAME", database.is_none()),
                    ("DB_USER", user.is_none()),
                    ("DB_PASSWORD", password.is_none()),
                ]
                .into_iter()
                .filter(|(_, absent)| *absent)
                .map(|(key, _)| key.to_string())
                .collect();
                Err(SinkError::ConfigurationIncomplete(missing))
            }
        }
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }
}

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Bound parameters per inserted row.
const COLUMNS: usize = 9;

/// Postgres caps one statement at 65,535 bind parameters.
const MAX_ROWS_PER_STATEMENT: usize = u16::MAX as usize / COLUMNS;

fn chunk_rows(batch_size: usize) -> usize {
    batch_size.clamp(1, MAX_ROWS_PER_STATEMENT)
}

pub struct PostgresSink {
    pool: PgPool,
    schema: String,
    table: String,
    batch_size: usize,
}

impl PostgresSink {
    pub async fn connect(settings: &PostgresSettings, config: &StorageConfig) -> Result<Self> {
        check_identifier(&settings.schema)?;
        check_identifier(&config.table_name)?;

        info!(
            "Connecting to postgres://{}:***@{}:{}/{}",
            settings.user, settings.host, settings.port, settings.database
        );
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(15))
            .connect_with(settings.connect_options())
            .await
            .context("Postgres connection failed")?;

        Ok(Self {
            pool,
            schema: settings.schema.clone(),
            table: config.table_name.clone(),
            batch_size: chunk_rows(config.batch_size),
        })
    }

    fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

#[async_trait]
impl ProductSink for PostgresSink {
    fn describe(&self) -> String {
        format!("postgres:{}", self.qualified_table())
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .execute(&self.pool)
            .await
            .context("CREATE SCHEMA failed")?;

        let ddl = format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
                id             SERIAL PRIMARY KEY,
                name           VARCHAR(500),
                category       VARCHAR(100),
                price_before   NUMERIC(18, 2),
                price_now      NUMERIC(18, 2),
                promotion_flag SMALLINT,
                measurements   VARCHAR(100),
                global_rank    INTEGER,
                product_id     VARCHAR(100),
                extracted_at   TIMESTAMP
            )"#,
            self.qualified_table()
        );
        sqlx::query(&ddl).execute(&self.pool).await.context("CREATE TABLE failed")?;
        Ok(())
    }

    async fn write(&self, products: &[RankedProduct]) -> Result<usize> {
        if products.is_empty() {
            return Ok(0);
        }

        let ranks = products
            .iter()
            .map(|p| {
                i32::try_from(p.global_rank)
                    .with_context(|| format!("rank {} does not fit an INTEGER column", p.global_rank))
            })
            .collect::<Result<Vec<i32>>>()?;

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for (i, (chunk, chunk_ranks)) in products
            .chunks(self.batch_size)
            .zip(ranks.chunks(self.batch_size))
            .enumerate()
        {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (name, category, price_before, price_now, promotion_flag, \
                 measurements, global_rank, product_id, extracted_at) ",
                self.qualified_table()
            ));
            qb.push_values(chunk.iter().zip(chunk_ranks), |mut row, (p, rank)| {
                row.push_bind(p.record.name.clone())
                    .push_bind(p.record.category.clone())
                    .push_bind(p.record.price_before)
                    .push_bind(p.record.price_now)
                    .push_bind(p.record.promotion_flag())
                    .push_bind(p.record.measurements.clone())
                    .push_bind(*rank)
                    .push_bind(p.record.product_id.clone())
                    .push_bind(p.extracted_at);
            });

            let result = qb
                .build()
                .execute(&mut *tx)
                .await
                .with_context(|| format!("insert chunk {}", i + 1))?;
            written += result.rows_affected();
            debug!("Chunk {}: {} rows", i + 1, result.rows_affected());
        }

        tx.commit().await?;
        Ok(written as usize)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
