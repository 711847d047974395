//! Parsing of Kubernetes-style resource quantities.

use tracing::debug;

const MEMORY_UNITS: [(&str, i64); 6] = [
    ("Ki", 1024),
    ("Mi", 1024 * 1024),
    ("Gi", 1024 * 1024 * 1024),
    ("K", 1000),
    ("M", 1000 * 1000),
    ("G", 1000 * 1000 * 1000),
];

fn unit_factor(unit: &str) -> Option<i64> {
    MEMORY_UNITS.iter().find(|(u, _)| *u == unit).map(|(_, f)| *f)
}

/// Integer value of `item` with the first occurrence of `sep` removed.
/// Empty, malformed and negative input all yield `0`.
pub fn raw_int(item: &str, sep: &str) -> i64 {
    if item.is_empty() || item == sep {
        return 0;
    }

    let to_conv = if sep.is_empty() {
        item.to_string()
    } else {
        item.replacen(sep, "", 1)
    };

    match to_conv.parse::<i64>() {
        Ok(value) if value >= 0 => value,
        other => {
            debug!("Error converting string to int [{}] {:?}", to_conv, other);
            0
        }
    }
}

/// Whole cores, from either `"4"` or `"4000m"`.
pub fn cpu_cores(item: &str) -> i64 {
    match item.strip_suffix('m') {
        Some(_) => super::stats::round(raw_int(item, "m") as f64 / 1000.0),
        None => raw_int(item, ""),
    }
}

/// Millicores, from either `"200m"`, `"2"` or `"1.5"`.
pub fn cpu_millicores(item: &str) -> i64 {
    if item.ends_with('m') {
        return raw_int(item, "m");
    }

    match item.parse::<f64>() {
        Ok(cores) if cores >= 0.0 => (cores * 1000.0).round() as i64,
        _ => 0,
    }
}

/// Memory quantity converted to `unit` (bytes when the unit is unknown).
pub fn memory(item: &str, unit: &str) -> i64 {
    let out_unit = unit_factor(unit).unwrap_or_else(|| {
        debug!("Memory output unit [{}] unknown, using bytes", unit);
        1
    });

    let (value, factor) = MEMORY_UNITS
        .iter()
        .find(|(suffix, _)| item.ends_with(suffix))
        .map(|(suffix, factor)| (raw_int(item, suffix), *factor))
        .unwrap_or_else(|| (raw_int(item, ""), 1));

    match value.checked_mul(factor) {
        Some(bytes) => bytes / out_unit,
        None => {
            debug!("Memory quantity [{}] out of range", item);
            0
        }
    }
}

pub fn memory_mb(item: &str) -> i64 {
    memory(item, "Mi")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_int() {
        assert_eq!(raw_int("m", "m"), 0);
        assert_eq!(raw_int("", "m"), 0);
        assert_eq!(raw_int("this_is_not_an_int", "m"), 0);
        assert_eq!(raw_int("-4", ""), 0);
        assert_eq!(raw_int("220", ""), 220);
        assert_eq!(raw_int("200m", "m"), 200);
    }

    #[test]
    fn test_cpu() {
        assert_eq!(cpu_cores("4"), 4);
        assert_eq!(cpu_cores("2000m"), 2);
        assert_eq!(cpu_cores(""), 0);
        assert_eq!(cpu_millicores("200m"), 200);
        assert_eq!(cpu_millicores("2"), 2000);
        assert_eq!(cpu_millicores("1.5"), 1500);
        assert_eq!(cpu_millicores("garbage"), 0);
    }

    #[test]
    fn test_memory() {
        assert_eq!(memory("1234", ""), 1234);
        assert_eq!(memory_mb("8040912Ki"), 7852);
        assert_eq!(memory_mb("140Mi"), 140);
        assert_eq!(memory_mb("2Gi"), 2048);
        assert_eq!(memory("1G", "M"), 1000);
        assert_eq!(memory_mb(""), 0);
    }

    #[test]
    fn test_memory_out_of_range_is_zero() {
        assert_eq!(memory_mb("9223372036854775807Gi"), 0);
        assert_eq!(memory_mb("9007199254740993Ki"), 0);
        assert_eq!(memory("9223372036854775807", ""), 9223372036854775807);
    }
}
