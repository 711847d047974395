//! Postgres persistence of published records and the admin read queries.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::config::PgConfig;
use crate::error::{Result, TelemetryError};
use crate::metrics;
use crate::models::{
    AggregatedFields, AggregatedFieldsByDate, ApiInstallation, ApiRecord, InstallSeen,
    RecordsByDateByUid,
};
use crate::query::{self, FieldPath, Scope};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS record (
        id BIGSERIAL PRIMARY KEY,
        uid TEXT NOT NULL,
        data JSONB NOT NULL,
        ts TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS record_uid_ts ON record (uid, ts)",
    r#"CREATE TABLE IF NOT EXISTS installation (
        id BIGSERIAL PRIMARY KEY,
        uid TEXT NOT NULL UNIQUE,
        last_ip TEXT NOT NULL DEFAULT '',
        last_record BIGINT NOT NULL REFERENCES record (id),
        first_seen TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_seen TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS byday (
        id BIGSERIAL PRIMARY KEY,
        uid TEXT NOT NULL,
        day DATE NOT NULL,
        record_id BIGINT NOT NULL REFERENCES record (id),
        UNIQUE (uid, day)
    )"#,
];

const RECORD_COLUMNS: &str = "id, uid, ts, data";

/// Installation uid a record is filed under: `record.install.uid`.
pub fn record_uid(record: &Value) -> Result<String> {
    record
        .pointer("/install/uid")
        .and_then(Value::as_str)
        .filter(|uid| !uid.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TelemetryError::BadRequest("Record has no install uid".to_string()))
}

/// Aggregates come back as `bigint` for sums and counts but as `int` for
/// `MIN`/`MAX`/`ROUND(AVG)`. The narrow read is only tried when the wide one
/// fails to decode. NULL reads as zero.
fn widen_int(
    wide: std::result::Result<Option<i64>, sqlx::Error>,
    narrow: impl FnOnce() -> std::result::Result<Option<i32>, sqlx::Error>,
) -> Result<i64> {
    match wide {
        Ok(value) => Ok(value.unwrap_or(0)),
        Err(sqlx::Error::ColumnDecode { .. }) => Ok(narrow()?.map(i64::from).unwrap_or(0)),
        Err(e) => Err(e.into()),
    }
}

fn int_column(row: &PgRow, index: usize) -> Result<i64> {
    widen_int(row.try_get(index), || row.try_get(index))
}

fn int_columns(row: &PgRow, from: usize, count: usize) -> Result<Vec<i64>> {
    (from..from + count).map(|index| int_column(row, index)).collect()
}

/// Every requested field, zero unless `totals` has a value for it.
fn zero_filled(paths: &[FieldPath], totals: Option<&[i64]>) -> AggregatedFields {
    paths
        .iter()
        .enumerate()
        .map(|(index, path)| {
            let total = totals.and_then(|t| t.get(index)).copied().unwrap_or(0);
            (path.to_string(), total)
        })
        .collect()
}

fn fields_by_day(paths: &[FieldPath], days: Vec<(String, Vec<i64>)>) -> AggregatedFieldsByDate {
    days.into_iter()
        .map(|(day, totals)| (day, zero_filled(paths, Some(totals.as_slice()))))
        .collect()
}

fn keyed_by_day(rows: Vec<(String, String, i64)>) -> AggregatedFieldsByDate {
    let mut out = AggregatedFieldsByDate::new();
    for (day, key, total) in rows {
        out.entry(day).or_default().insert(key, total);
    }
    out
}

/// Buckets records newest first, keeping the first one seen for each
/// installation on each day.
fn latest_per_uid_by_day(records: Vec<ApiRecord>) -> RecordsByDateByUid {
    let mut out = RecordsByDateByUid::new();
    for record in records {
        let day = record.ts.format("%Y-%m-%d").to_string();
        out.entry(day)
            .or_default()
            .entry(record.uid.clone())
            .or_insert(record);
    }
    out
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(config: &PgConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(config.connect_options()?)
            .await?;

        let store = Self::from_pool(pool);
        store.ping().await?;
        info!("Connected to Postgres at {}", config.host);
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema ready");
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        if one != 1 {
            return Err(TelemetryError::Database(format!("SELECT 1 == {}?!", one)));
        }
        Ok(())
    }

    /// Appends the record, points the installation at it and makes it the
    /// record of the day for that installation. Later records of the same
    /// day replace earlier ones in the day bucket.
    pub async fn report(&self, record: &Value, client_ip: &str) -> Result<i64> {
        let uid = record_uid(record)?;
        debug!("Publishing to Postgres uid={}", uid);

        let mut tx = self.pool.begin().await?;

        let record_id: i64 = sqlx::query_scalar(
            "INSERT INTO record (uid, data, ts) VALUES ($1, $2, NOW()) RETURNING id",
        )
        .bind(&uid)
        .bind(record)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO installation (uid, last_ip, last_record, first_seen, last_seen)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (uid) DO UPDATE SET
                last_seen = NOW(),
                last_ip = EXCLUDED.last_ip,
                last_record = EXCLUDED.last_record"#,
        )
        .bind(&uid)
        .bind(client_ip)
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO byday (uid, day, record_id)
            VALUES ($1, CURRENT_DATE, $2)
            ON CONFLICT (uid, day) DO UPDATE SET record_id = EXCLUDED.record_id"#,
        )
        .bind(&uid)
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        metrics::record_persisted();

        debug!("Published to Postgres record={}", record_id);
        Ok(record_id)
    }

    pub async fn active_installs(&self, hours: i32) -> Result<Vec<ApiInstallation>> {
        let installs = sqlx::query_as::<_, ApiInstallation>(
            r#"SELECT i.id, i.uid, i.first_seen, i.last_seen, i.last_ip, r.data
            FROM installation i
                JOIN record r ON (i.last_record = r.id)
            WHERE i.last_seen >= NOW() - make_interval(hours => $1::int)
            ORDER BY i.id"#,
        )
        .bind(hours)
        .fetch_all(&self.pool)
        .await?;
        Ok(installs)
    }

    /// Latest record per installation for each of the last `days` days.
    pub async fn records_grouped_by_day(&self, days: i32) -> Result<RecordsByDateByUid> {
        let records = sqlx::query_as::<_, ApiRecord>(&format!(
            r#"SELECT {RECORD_COLUMNS}
            FROM record
            WHERE ts >= date_trunc('day', NOW()) - make_interval(days => $1::int)
            ORDER BY id DESC"#
        ))
        .bind(days)
        .fetch_all(&self.pool)
        .await?;

        Ok(latest_per_uid_by_day(records))
    }

    pub async fn records_by_uid(&self, uid: &str, days: i32) -> Result<Vec<ApiRecord>> {
        let records = sqlx::query_as::<_, ApiRecord>(&format!(
            r#"SELECT {RECORD_COLUMNS}
            FROM record
            WHERE uid = $1
                AND ts >= date_trunc('day', NOW()) - make_interval(days => $2::int)
            ORDER BY id DESC"#
        ))
        .bind(uid)
        .bind(days)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn record_by_id(&self, id: i64) -> Result<ApiRecord> {
        sqlx::query_as::<_, ApiRecord>(&format!("SELECT {RECORD_COLUMNS} FROM record WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| TelemetryError::NotFound(format!("record {}", id)))
    }

    pub async fn all_installs(&self) -> Result<Vec<InstallSeen>> {
        let installs = sqlx::query_as::<_, InstallSeen>(
            "SELECT id, uid, first_seen, last_seen FROM installation ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(installs)
    }

    /// Number of installations that reported on each day.
    pub async fn active_count_by_day(&self) -> Result<BTreeMap<String, i64>> {
        let rows = sqlx::query(
            r#"SELECT to_char(day, 'YYYY-MM-DD') AS day, COUNT(*) AS total
            FROM byday
            GROUP BY day
            ORDER BY day"#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get::<String, _>(0)?, int_column(row, 1)?)))
            .collect()
    }

    async fn fetch(&self, sql: &str, scope: &Scope) -> Result<Vec<PgRow>> {
        debug!("SQL: {}", sql);
        let query = sqlx::query(sql);
        let query = match scope {
            Scope::Active { hours } => query.bind(*hours),
            Scope::ByDay { days, uid } => query.bind(*days).bind(uid.as_str()),
        };
        Ok(query.fetch_all(&self.pool).await?)
    }

    pub async fn sum_of_active_installs(&self, hours: i32, fields: &[String]) -> Result<AggregatedFields> {
        let paths = query::parse_fields(fields)?;
        let scope = Scope::active(hours);
        let rows = self.fetch(&query::fields_query(&paths, &scope), &scope).await?;

        let totals = rows.first().map(|row| int_columns(row, 0, paths.len())).transpose()?;
        Ok(zero_filled(&paths, totals.as_deref()))
    }

    pub async fn sum_by_day(&self, days: i32, fields: &[String], uid: &str) -> Result<AggregatedFieldsByDate> {
        let paths = query::parse_fields(fields)?;
        let scope = Scope::by_day(days, uid);
        let rows = self.fetch(&query::fields_query(&paths, &scope), &scope).await?;

        let days = rows
            .iter()
            .map(|row| Ok((row.try_get::<String, _>(0)?, int_columns(row, 1, paths.len())?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(fields_by_day(&paths, days))
    }

    pub async fn sum_of_active_installs_map(&self, hours: i32, field: &str) -> Result<AggregatedFields> {
        let path = FieldPath::parse(field)?;
        let scope = Scope::active(hours);
        let rows = self.fetch(&query::map_query(&path, &scope), &scope).await?;
        keyed_totals(&rows)
    }

    pub async fn sum_by_day_map(&self, days: i32, field: &str, uid: &str) -> Result<AggregatedFieldsByDate> {
        let path = FieldPath::parse(field)?;
        let scope = Scope::by_day(days, uid);
        let rows = self.fetch(&query::map_query(&path, &scope), &scope).await?;
        keyed_totals_by_day(&rows)
    }

    pub async fn sum_of_active_installs_value(&self, hours: i32, field: &str) -> Result<AggregatedFields> {
        let path = FieldPath::parse(field)?;
        let scope = Scope::active(hours);
        let rows = self.fetch(&query::value_query(&path, &scope), &scope).await?;
        keyed_totals(&rows)
    }

    pub async fn sum_by_day_value(&self, days: i32, field: &str, uid: &str) -> Result<AggregatedFieldsByDate> {
        let path = FieldPath::parse(field)?;
        let scope = Scope::by_day(days, uid);
        let rows = self.fetch(&query::value_query(&path, &scope), &scope).await?;
        keyed_totals_by_day(&rows)
    }
}

/// Rows of `(key, total)`.
fn keyed_totals(rows: &[PgRow]) -> Result<AggregatedFields> {
    rows.iter()
        .map(|row| Ok((row.try_get::<String, _>(0)?, int_column(row, 1)?)))
        .collect()
}

/// Rows of `(day, key, total)`.
fn keyed_totals_by_day(rows: &[PgRow]) -> Result<AggregatedFieldsByDate> {
    let rows = rows
        .iter()
        .map(|row| Ok((row.try_get::<String, _>(0)?, row.try_get::<String, _>(1)?, int_column(row, 2)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(keyed_by_day(rows))
}
