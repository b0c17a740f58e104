//! Warehouse store
//!
//! Connection management, configuration and schema handling for the
//! PostgreSQL star schema, plus the repositories that read and write it.

use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ConfigError, LoadError};

pub mod dimension_repository;
pub mod fact_repository;

pub use dimension_repository::DimensionRepository;
pub use fact_repository::FactOrderRow;

/// DDL for the four dimension tables and the fact table
pub const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Warehouse tables, facts first so truncation order never matters
pub const WAREHOUSE_TABLES: [&str; 5] = [
    "fact_orders",
    "dim_customer",
    "dim_product",
    "dim_payment",
    "dim_date",
];

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
}

impl DatabaseConfig {
    /// Read configuration from the environment.
    ///
    /// `DATABASE_URL` wins when set; otherwise the URL is assembled from the
    /// `POSTGRES_*` variables with local defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_url(None)
    }

    /// Like [`DatabaseConfig::from_env`], but an explicit URL replaces
    /// `DATABASE_URL` and the `POSTGRES_*` variables are not read at all
    pub fn from_env_with_url(database_url: Option<String>) -> Result<Self, ConfigError> {
        let database_url = match database_url.or_else(|| std::env::var("DATABASE_URL").ok()) {
            Some(url) => url,
            None => {
                let var = |key: &str, default: &str| {
                    std::env::var(key).unwrap_or_else(|_| default.to_string())
                };
                postgres_url(
                    &var("POSTGRES_USER", "postgres"),
                    &var("POSTGRES_PASSWORD", "postgres"),
                    &var("POSTGRES_HOST", "localhost"),
                    &var("POSTGRES_PORT", "5432"),
                    &var("POSTGRES_DB", "appdb"),
                )?
            }
        };

        let max_connections = match std::env::var("DATABASE_POOL_SIZE") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "DATABASE_POOL_SIZE".to_string(),
                value,
            })?,
            Err(_) => 5,
        };

        Ok(Self {
            database_url,
            max_connections,
            connection_timeout: Duration::from_secs(30),
        })
    }

}

fn postgres_url(
    user: &str,
    password: &str,
    host: &str,
    port: &str,
    name: &str,
) -> Result<String, ConfigError> {
    let port: u16 = port.parse().map_err(|_| ConfigError::InvalidValue {
        key: "POSTGRES_PORT".to_string(),
        value: port.to_string(),
    })?;
    let invalid = |key: &str, value: &str| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    };

    let mut url = url::Url::parse("postgresql://localhost")
        .map_err(|_| invalid("POSTGRES_HOST", host))?;
    url.set_host(Some(host))
        .map_err(|_| invalid("POSTGRES_HOST", host))?;
    url.set_port(Some(port))
        .map_err(|_| invalid("POSTGRES_PORT", &port.to_string()))?;
    url.set_username(user)
        .map_err(|_| invalid("POSTGRES_USER", user))?;
    url.set_password(Some(password))
        .map_err(|_| invalid("POSTGRES_PASSWORD", "***"))?;
    url.set_path(&format!("/{}", name));
    Ok(url.to_string())
}

/// Connection pool to the warehouse
pub struct Warehouse {
    pool: PgPool,
}

impl Warehouse {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        info!(
            "Connecting to database: {}",
            mask_database_url(&config.database_url)
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                e
            })?;

        info!("Database connection pool created");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create any missing warehouse tables and indexes
    pub async fn apply_schema(&self) -> Result<(), LoadError> {
        info!("Applying warehouse schema");
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check that every warehouse table exists before a load
    pub async fn verify_schema(&self) -> Result<(), LoadError> {
        let present: Vec<String> = sqlx::query_scalar(
            r#"SELECT table_name::text
               FROM information_schema.tables
               WHERE table_schema = current_schema()
                 AND table_name::text = ANY($1)"#,
        )
        .bind(&WAREHOUSE_TABLES[..])
        .fetch_all(&self.pool)
        .await?;

        let missing: Vec<&str> = WAREHOUSE_TABLES
            .iter()
            .copied()
            .filter(|t| !present.iter().any(|p| p == t))
            .collect();

        if !missing.is_empty() {
            warn!("Warehouse tables missing: {:?}", missing);
            return Err(LoadError::Schema(format!(
                "missing tables {}; run `star_etl init-schema` first",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Empty every warehouse table and restart identity sequences so a run
    /// reassigns surrogate keys from 1
    pub async fn truncate_all(&self, conn: &mut PgConnection) -> Result<(), LoadError> {
        let sql = format!(
            "TRUNCATE TABLE {} RESTART IDENTITY CASCADE",
            WAREHOUSE_TABLES.join(", ")
        );
        sqlx::query(&sql).execute(&mut *conn).await?;
        info!("Truncate complete for tables: {:?}", WAREHOUSE_TABLES);
        Ok(())
    }

    pub async fn close(self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}

/// Mask sensitive information in database URL for logging
pub fn mask_database_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut masked = parsed.clone();
        if parsed.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else {
        let head = url.get(..10);
        let tail = url.len().checked_sub(10).and_then(|i| url.get(i..));
        match (head, tail) {
            (Some(head), Some(tail)) if url.len() > 20 => format!("{}***{}", head, tail),
            _ => "***".to_string(),
        }
    }
}
