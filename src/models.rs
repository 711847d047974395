use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use tracing::debug;

/// Field name (or map key, or distinct value) to aggregate.
pub type AggregatedFields = BTreeMap<String, i64>;

/// `YYYY-MM-DD` to the aggregates of that day.
pub type AggregatedFieldsByDate = BTreeMap<String, AggregatedFields>;

pub type RecordsByUid = BTreeMap<String, ApiRecord>;
pub type RecordsByDateByUid = BTreeMap<String, RecordsByUid>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ApiInstallation {
    pub id: i64,
    pub uid: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_ip: String,
    #[sqlx(rename = "data")]
    pub record: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ApiRecord {
    pub id: i64,
    pub uid: String,
    pub ts: DateTime<Utc>,
    #[sqlx(rename = "data")]
    pub record: Value,
}

/// First and last sighting of an installation.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct InstallSeen {
    pub id: i64,
    pub uid: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallCounts {
    pub total: i64,
    pub alive: i64,
    pub active: i64,
    pub born: i64,
    pub died: i64,
}

pub type InstallsByDay = BTreeMap<String, InstallCounts>;

pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Walks every day from an installation's first sighting up to `today`.
///
/// On each of those days the installation counts toward `total`; it is
/// `born` on its first day, `alive` up to its last day and `died` the day
/// after. `active` comes from the per-day record buckets.
pub fn installs_by_day(
    installs: &[InstallSeen],
    active_by_day: &BTreeMap<String, i64>,
    today: NaiveDate,
) -> InstallsByDay {
    let mut out = InstallsByDay::new();

    for install in installs {
        let first_day = install.first_seen.date_naive();
        let last_day = install.last_seen.date_naive();
        let died_day = last_day.checked_add_days(Days::new(1));

        for day in first_day.iter_days().take_while(|day| *day <= today) {
            let entry = out.entry(day_key(day)).or_default();
            entry.total += 1;

            if day == first_day {
                debug!("{} born on {}", install.id, day);
                entry.born += 1;
            }
            if Some(day) == died_day {
                debug!("{} died on {}", install.id, day);
                entry.died += 1;
            }
            if day <= last_day {
                entry.alive += 1;
            }
        }
    }

    for (day, count) in active_by_day {
        out.entry(day.clone()).or_default().active = *count;
    }

    out
}

/// List envelope of the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct Collection<T> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "resourceType")]
    pub resource_type: &'static str,
    pub data: T,
}

impl<T> Collection<T> {
    pub fn new(resource_type: &'static str, data: T) -> Self {
        Self {
            kind: "collection",
            resource_type,
            data,
        }
    }
}
