/// PostgreSQL backend for `MetricStore`.
///
/// Connection settings come from `DATABASE_URL`, read from the environment
/// or a `.env` file. The schema lives in `SCHEMA_SQL` and is applied with
/// `PgStore::ensure_schema`.

use std::env;

use chrono::{DateTime, Utc};
use postgres::{Client, NoTls};

use crate::logging::{self, Component};
use crate::model::{MetricId, MetricSample, SeriesKey, StoreError};
use crate::store::{MetricStore, Order, ReadQuery};

/// Tables used by the monitor. Idempotent.
pub const SCHEMA_SQL: &str = "
    CREATE SCHEMA IF NOT EXISTS monitoring;

    CREATE TABLE IF NOT EXISTS monitoring.metric_samples (
        series_key  TEXT             NOT NULL,
        metric_key  TEXT             NOT NULL,
        field_name  TEXT             NOT NULL,
        object_kind TEXT,
        object_id   TEXT,
        sample_time TIMESTAMPTZ      NOT NULL,
        value       DOUBLE PRECISION NOT NULL,
        PRIMARY KEY (series_key, sample_time)
    );

    CREATE TABLE IF NOT EXISTS monitoring.metric_health (
        metric_id  BIGINT      PRIMARY KEY,
        is_healthy BOOLEAN     NOT NULL DEFAULT TRUE,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
";

/// Opens a connection using `DATABASE_URL`.
pub fn connect() -> Result<Client, StoreError> {
    dotenv::dotenv().ok();
    let url = env::var("DATABASE_URL").map_err(|_| StoreError::MissingDatabaseUrl)?;
    Ok(Client::connect(&url, NoTls)?)
}

pub struct PgStore {
    client: Client,
}

impl PgStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects with `DATABASE_URL` and applies the schema.
    pub fn connect() -> Result<Self, StoreError> {
        let mut store = Self::new(connect()?);
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn ensure_schema(&mut self) -> Result<(), StoreError> {
        self.client.batch_execute(SCHEMA_SQL)?;
        logging::debug(Component::Store, None, "monitoring schema ready");
        Ok(())
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

fn metric_column(metric: MetricId) -> Result<i64, StoreError> {
    i64::try_from(metric.0).map_err(|_| StoreError::IdOutOfRange(metric))
}

impl MetricStore for PgStore {
    fn write_sample(&mut self, series: &SeriesKey, sample: &MetricSample) -> Result<(), StoreError> {
        let (kind, id) = match &series.object {
            Some((kind, id)) => (Some(kind.as_str()), Some(id.as_str())),
            None => (None, None),
        };
        self.client.execute(
            "INSERT INTO monitoring.metric_samples
                 (series_key, metric_key, field_name, object_kind, object_id, sample_time, value)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (series_key, sample_time) DO UPDATE SET value = EXCLUDED.value",
            &[
                &series.to_string(),
                &series.key,
                &series.field,
                &kind,
                &id,
                &sample.timestamp,
                &sample.value,
            ],
        )?;
        Ok(())
    }

    fn read_samples(
        &mut self,
        series: &SeriesKey,
        query: &ReadQuery,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let direction = match query.order {
            Order::Ascending => "ASC",
            Order::Descending => "DESC",
        };
        // LIMIT NULL means no limit
        let limit: Option<i64> = query.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let sql = format!(
            "SELECT sample_time, value
             FROM monitoring.metric_samples
             WHERE series_key = $1
               AND ($2::timestamptz IS NULL OR sample_time >= $2)
               AND ($3::timestamptz IS NULL OR sample_time <= $3)
             ORDER BY sample_time {}
             LIMIT $4",
            direction
        );
        let rows = self
            .client
            .query(&sql, &[&series.to_string(), &query.since, &query.until, &limit])?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp: DateTime<Utc> = row.get(0);
            samples.push(MetricSample::new(row.get(1), timestamp));
        }
        Ok(samples)
    }

    fn load_health(&mut self, metric: MetricId) -> Result<Option<bool>, StoreError> {
        let row = self.client.query_opt(
            "SELECT is_healthy FROM monitoring.metric_health WHERE metric_id = $1",
            &[&metric_column(metric)?],
        )?;
        Ok(row.map(|r| r.get(0)))
    }

    fn record_transition(&mut self, metric: MetricId, healthy: bool) -> Result<bool, StoreError> {
        let id = metric_column(metric)?;
        self.client.execute(
            "INSERT INTO monitoring.metric_health (metric_id) VALUES ($1)
             ON CONFLICT (metric_id) DO NOTHING",
            &[&id],
        )?;
        // the conditional update is the compare-and-set: only one writer
        // sees a changed row for a given transition
        let changed = self.client.execute(
            "UPDATE monitoring.metric_health
             SET is_healthy = $2, updated_at = now()
             WHERE metric_id = $1 AND is_healthy <> $2",
            &[&id, &healthy],
        )?;
        Ok(changed == 1)
    }
}
