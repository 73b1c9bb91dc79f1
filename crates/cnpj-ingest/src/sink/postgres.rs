use super::Sink;
use crate::error::SinkError;
use crate::transform::{FieldValue, Record, TableSchema};
use async_trait::async_trait;
use cnpj_common::types::{EntityKind, Period};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info};

/// Postgres caps bind parameters per statement at 65535.
const MAX_BIND_PARAMS: usize = 65_535;

/// Postgres-backed sink.
///
/// Each batch runs in one transaction; inside it, the batch is split into as
/// many multi-row `INSERT .. ON CONFLICT` statements as the bind limit needs.
#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        info!(max_connections, "Connected to Postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create or update the registry tables and the ledger.
    pub async fn migrate(&self) -> Result<(), SinkError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

fn upsert_statement<'a>(schema: &TableSchema, records: &'a [Record]) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        schema.table,
        schema.columns.join(", ")
    ));

    builder.push_values(records, |mut row, record| {
        for value in record.values() {
            match value {
                FieldValue::Text(v) => row.push_bind(v),
                FieldValue::Date(v) => row.push_bind(v),
                FieldValue::Decimal(v) => row.push_bind(v),
            };
        }
    });

    let updates: Vec<String> = schema
        .columns
        .iter()
        .filter(|column| !schema.key.contains(column))
        .map(|column| format!("{column} = EXCLUDED.{column}"))
        .chain(std::iter::once("data_atualizacao = NOW()".to_string()))
        .collect();

    builder.push(format!(
        " ON CONFLICT ({}) DO UPDATE SET {}",
        schema.key.join(", "),
        updates.join(", ")
    ));

    builder
}

#[async_trait]
impl Sink for PostgresSink {
    async fn upsert_batch(&self, kind: EntityKind, records: &[Record]) -> Result<u64, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        let schema = TableSchema::for_kind(kind);
        let rows_per_statement = (MAX_BIND_PARAMS / schema.columns.len()).max(1);
        let mut tx = self.pool.begin().await?;
        let mut applied = 0;

        for chunk in records.chunks(rows_per_statement) {
            let mut statement = upsert_statement(&schema, chunk);
            applied += statement.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(table = schema.table, rows = applied, "Batch committed");
        Ok(applied)
    }

    async fn is_ledgered(&self, period: Period, filename: &str) -> Result<bool, SinkError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM processed_files WHERE period = $1 AND filename = $2)",
        )
        .bind(period.to_string())
        .bind(filename)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn mark_ledgered(&self, period: Period, filename: &str) -> Result<(), SinkError> {
        sqlx::query(
            r#"
            INSERT INTO processed_files (period, filename, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (period, filename) DO NOTHING
            "#,
        )
        .bind(period.to_string())
        .bind(filename)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset_ledger(&self, period: Option<Period>) -> Result<u64, SinkError> {
        let result = match period {
            Some(period) => {
                sqlx::query("DELETE FROM processed_files WHERE period = $1")
                    .bind(period.to_string())
                    .execute(&self.pool)
                    .await?
            },
            None => sqlx::query("DELETE FROM processed_files").execute(&self.pool).await?,
        };

        Ok(result.rows_affected())
    }
}
