//! Attribute summaries for merged clusters.

use crate::config::AggregationConfig;
use crate::models::RawRecord;
use crate::temporal::dates::DATE_FIELDS;
use crate::temporal::is_date_shaped;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Decides which string fields are summarized as categories.
#[derive(Debug, Clone)]
pub struct CategoryPolicy {
    denylist: Vec<String>,
    listed_values: usize,
    truncate_after: usize,
}

impl From<&AggregationConfig> for CategoryPolicy {
    fn from(config: &AggregationConfig) -> Self {
        Self {
            denylist: config
                .category_denylist
                .iter()
                .map(|f| f.to_lowercase())
                .collect(),
            listed_values: config.listed_values.max(1),
            truncate_after: config.truncate_after.max(config.listed_values),
        }
    }
}

impl Default for CategoryPolicy {
    fn default() -> Self {
        Self::from(&AggregationConfig::default())
    }
}

impl CategoryPolicy {
    /// True if values of `field` may be summarized at all.
    pub fn accepts_field(&self, field: &str) -> bool {
        if field.starts_with('_') || DATE_FIELDS.contains(&field) {
            return false;
        }
        let lowered = field.to_lowercase();
        !self.denylist.iter().any(|d| *d == lowered)
    }

    /// True if `value` looks like a category label.
    pub fn accepts_value(&self, value: &str) -> bool {
        let v = value.trim();
        !v.is_empty() && v.parse::<f64>().is_err() && !is_date_shaped(v)
    }

    /// Join distinct values, truncating long lists with a "+K more" suffix.
    pub fn join_values(&self, values: &[String]) -> String {
        if values.len() > self.truncate_after {
            format!(
                "{} +{} more",
                values[..self.listed_values].join(", "),
                values.len() - self.listed_values
            )
        } else {
            values.join(", ")
        }
    }

    /// Per-field summaries of the string attributes shared by a group.
    pub fn summarize(&self, records: &[&RawRecord]) -> Map<String, Value> {
        let mut order: Vec<&str> = Vec::new();
        let mut distinct: HashMap<&str, Vec<String>> = HashMap::new();

        for record in records {
            for (field, value) in record.iter() {
                let Value::String(s) = value else {
                    continue;
                };
                if !self.accepts_field(field) || !self.accepts_value(s) {
                    continue;
                }
                let values = distinct.entry(field.as_str()).or_insert_with(|| {
                    order.push(field.as_str());
                    Vec::new()
                });
                let s = s.trim();
                if !values.iter().any(|v| v == s) {
                    values.push(s.to_string());
                }
            }
        }

        order
            .into_iter()
            .map(|field| {
                let summary = self.join_values(&distinct[field]);
                (field.to_string(), Value::String(summary))
            })
            .collect()
    }
}

/// Human-readable summary of the dates in a cluster.
///
/// One date is shown verbatim, up to `listed` dates are joined, more are
/// collapsed to a `first – last (N dates)` range.
pub fn summarize_dates(dates: &[NaiveDate], listed: usize) -> Option<String> {
    let mut distinct = dates.to_vec();
    distinct.sort_unstable();
    distinct.dedup();

    match distinct.as_slice() {
        [] => None,
        [only] => Some(only.to_string()),
        all if all.len() <= listed => Some(
            all.iter()
                .map(NaiveDate::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        [first, .., last] => Some(format!("{} – {} ({} dates)", first, last, distinct.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_summarize_skips_numeric_dates_and_denylisted() {
        let a = record(json!({
            "id": "r-1",
            "status": "open",
            "ward": "12",
            "opened": "2024-06-01",
            "date": "2024-06-01",
            "type": "Pothole",
        }));
        let b = record(json!({
            "id": "r-2",
            "status": "closed",
            "ward": "12",
            "type": "Pothole",
            "priority": 3,
        }));

        let summary = CategoryPolicy::default().summarize(&[&a, &b]);
        assert_eq!(summary.get("status"), Some(&json!("open, closed")));
        assert_eq!(summary.get("type"), Some(&json!("Pothole")));
        assert!(summary.get("id").is_none());
        assert!(summary.get("ward").is_none());
        assert!(summary.get("opened").is_none());
        assert!(summary.get("date").is_none());
        assert!(summary.get("priority").is_none());
    }

    #[test]
    fn test_truncation_threshold() {
        let policy = CategoryPolicy::default();
        let five: Vec<String> = (1..=5).map(|i| format!("v{}", i)).collect();
        assert_eq!(policy.join_values(&five), "v1, v2, v3, v4, v5");

        let seven: Vec<String> = (1..=7).map(|i| format!("v{}", i)).collect();
        assert_eq!(policy.join_values(&seven), "v1, v2, v3 +4 more");
    }

    #[test]
    fn test_configurable_denylist() {
        let config = AggregationConfig {
            category_denylist: vec!["Status".to_string()],
            ..AggregationConfig::default()
        };
        let policy = CategoryPolicy::from(&config);
        let a = record(json!({ "status": "open", "id": "x" }));
        let summary = policy.summarize(&[&a]);
        assert!(summary.get("status").is_none());
        assert_eq!(summary.get("id"), Some(&json!("x")));
    }

    #[test]
    fn test_summarize_dates() {
        assert_eq!(summarize_dates(&[], 3), None);
        assert_eq!(
            summarize_dates(&[date(2024, 6, 1), date(2024, 6, 1)], 3),
            Some("2024-06-01".to_string())
        );
        assert_eq!(
            summarize_dates(&[date(2024, 6, 3), date(2024, 6, 1)], 3),
            Some("2024-06-01, 2024-06-03".to_string())
        );
        assert_eq!(
            summarize_dates(
                &[
                    date(2024, 6, 9),
                    date(2024, 6, 1),
                    date(2024, 6, 4),
                    date(2024, 6, 5)
                ],
                3
            ),
            Some("2024-06-01 – 2024-06-09 (4 dates)".to_string())
        );
    }
}
