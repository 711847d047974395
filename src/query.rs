//! SQL for the aggregate admin queries.
//!
//! Caller supplied field paths such as `cpu.util_avg` address values inside
//! the `record.data` JSON column. A path is only ever interpolated after it
//! has been parsed into a [`FieldPath`]; everything else a query varies on
//! (hours, days, uid) is a bind parameter.

use std::fmt;

use crate::collector::stats::UNKNOWN_LABEL;
use crate::error::{Result, TelemetryError};

/// JSON column of the `record` table as aliased in every query.
pub const RECORD_DATA: &str = "r.data";

/// Aggregate function picked from the field name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Min,
    Max,
    Avg,
}

impl Aggregate {
    /// Suffixes are checked in the order `_min`, `_avg`, `_max`.
    pub fn from_field(field: &str) -> Self {
        if field.ends_with("_min") {
            Aggregate::Min
        } else if field.ends_with("_avg") {
            Aggregate::Avg
        } else if field.ends_with("_max") {
            Aggregate::Max
        } else {
            Aggregate::Sum
        }
    }

    pub fn apply(&self, expr: &str) -> String {
        match self {
            Aggregate::Sum => format!("SUM({})", expr),
            Aggregate::Min => format!("MIN({})", expr),
            Aggregate::Max => format!("MAX({})", expr),
            Aggregate::Avg => format!("ROUND(AVG({}))::int", expr),
        }
    }
}

/// A validated dotted path into a record: `^[A-Za-z0-9._-]+$` with no
/// empty segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
}

fn is_field_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

impl FieldPath {
    pub fn parse(field: &str) -> Result<Self> {
        let valid = !field.is_empty()
            && field.chars().all(is_field_char)
            && field.split('.').all(|segment| !segment.is_empty());

        if !valid {
            return Err(TelemetryError::InvalidField(field.to_string()));
        }

        Ok(Self { raw: field.to_string() })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.raw.split('.')
    }

    pub fn aggregate(&self) -> Aggregate {
        Aggregate::from_field(&self.raw)
    }

    /// `'a','b'` for use as variadic JSON path arguments.
    fn path_args(&self) -> String {
        self.segments()
            .map(|segment| format!("'{}'", segment))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Text value at this path.
    pub fn text(&self, column: &str) -> String {
        format!("jsonb_extract_path_text({},{})", column, self.path_args())
    }

    /// JSON value at this path.
    pub fn json(&self, column: &str) -> String {
        format!("jsonb_extract_path({},{})", column, self.path_args())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

pub fn parse_fields<S: AsRef<str>>(fields: &[S]) -> Result<Vec<FieldPath>> {
    fields.iter().map(|f| FieldPath::parse(f.as_ref())).collect()
}

/// `MIN(jsonb_extract_path_text(col,'a','b')::int) AS "a.b"`, aliased back
/// to the original field.
pub fn build_field_expression(field: &str, column: &str) -> Result<String> {
    let path = FieldPath::parse(field)?;
    Ok(field_expression(&path, column))
}

fn field_expression(path: &FieldPath, column: &str) -> String {
    let value = format!("{}::int", path.text(column));
    format!("{} AS \"{}\"", path.aggregate().apply(&value), path)
}

/// Projection for several fields, in order.
pub fn field_projection(fields: &[FieldPath], column: &str) -> String {
    fields
        .iter()
        .map(|path| format!("    {}", field_expression(path, column)))
        .collect::<Vec<_>>()
        .join(",\n")
}

/// Which records a query aggregates over.
///
/// `Active` binds `$1` = hours. `ByDay` binds `$1` = days and `$2` = uid;
/// an empty uid selects every installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Active { hours: i32 },
    ByDay { days: i32, uid: String },
}

impl Scope {
    pub fn active(hours: i32) -> Self {
        Scope::Active { hours }
    }

    pub fn by_day(days: i32, uid: impl Into<String>) -> Self {
        Scope::ByDay { days, uid: uid.into() }
    }

    fn source(&self) -> &'static str {
        match self {
            Scope::Active { .. } => "FROM installation i\n    JOIN record r ON (i.last_record = r.id)",
            Scope::ByDay { .. } => "FROM byday b\n    JOIN record r ON (b.record_id = r.id)",
        }
    }

    fn filter(&self) -> &'static str {
        match self {
            Scope::Active { .. } => "i.last_seen >= NOW() - make_interval(hours => $1::int)",
            Scope::ByDay { uid, .. } if uid.is_empty() => {
                "b.day >= CURRENT_DATE - $1::int\n    AND b.uid != $2"
            }
            Scope::ByDay { .. } => "b.day >= CURRENT_DATE - $1::int\n    AND b.uid = $2",
        }
    }

    fn day_column(&self) -> Option<&'static str> {
        match self {
            Scope::Active { .. } => None,
            Scope::ByDay { .. } => Some("to_char(b.day, 'YYYY-MM-DD')"),
        }
    }

    /// `SELECT` head, with the day as first column for by-day scopes.
    fn select(&self, columns: &str) -> String {
        match self.day_column() {
            Some(day) => format!("SELECT\n    {} AS day,\n{}", day, columns),
            None => format!("SELECT\n{}", columns),
        }
    }

    fn group_by(&self, extra: Option<&str>) -> String {
        let keys: Vec<&str> = self.day_column().map(|_| "day").into_iter().chain(extra).collect();
        if keys.is_empty() {
            return String::new();
        }
        let keys = keys.join(", ");
        format!("\nGROUP BY {keys}\nORDER BY {keys}")
    }
}

/// One aggregate per field; one row for `Active`, one row per day for `ByDay`.
pub fn fields_query(fields: &[FieldPath], scope: &Scope) -> String {
    format!(
        "{}\n{}\nWHERE {}{}",
        scope.select(&field_projection(fields, RECORD_DATA)),
        scope.source(),
        scope.filter(),
        scope.group_by(None),
    )
}

/// Sum per key of the object found at `field`; rows are `([day,] key, sum)`.
pub fn map_query(field: &FieldPath, scope: &Scope) -> String {
    let object = field.json(RECORD_DATA);
    format!(
        "{}\n{},\n    jsonb_each_text(CASE WHEN jsonb_typeof({object}) = 'object' THEN {object} ELSE '{{}}'::jsonb END) AS jet\nWHERE {}{}",
        scope.select("    jet.key AS key,\n    SUM(jet.value::int) AS total"),
        scope.source(),
        scope.filter(),
        scope.group_by(Some("key")),
    )
}

/// Number of records per distinct value found at `field`; rows are
/// `([day,] value, count)`. Missing values count as `(unknown)`.
pub fn value_query(field: &FieldPath, scope: &Scope) -> String {
    let columns = format!(
        "    COALESCE({}, '{}') AS value,\n    COUNT(*) AS total",
        field.text(RECORD_DATA),
        UNKNOWN_LABEL,
    );
    format!(
        "{}\n{}\nWHERE {}{}",
        scope.select(&columns),
        scope.source(),
        scope.filter(),
        scope.group_by(Some("value")),
    )
}
