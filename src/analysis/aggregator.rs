//! Spatial aggregation of raw records into rendering features.
//!
//! Records whose coordinates round to the same grid cell are merged into a
//! single feature carrying a count, a visual scale and attribute summaries.

use crate::config::AggregationConfig;
use crate::models::{AggregatedFeature, Bounds, FeatureSet, RawRecord};
use crate::temporal::dates::{extract_date, DATES_SUMMARY_FIELD, STORED_DATE_FIELD};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::debug;

use super::coords::{extract_coordinates, from_grid_key, grid_key};
use super::summary::{summarize_dates, CategoryPolicy};

/// Records sharing one rounded coordinate.
struct Group<'a> {
    key: (i64, i64),
    members: Vec<&'a RawRecord>,
    dates: Vec<NaiveDate>,
}

/// Groups raw records by rounded coordinate.
#[derive(Debug, Clone)]
pub struct PointAggregator {
    precision: u32,
    scale_base: f64,
    scale_step: f64,
    scale_max: f64,
    listed_dates: usize,
    policy: CategoryPolicy,
}

impl Default for PointAggregator {
    fn default() -> Self {
        Self::new(&AggregationConfig::default())
    }
}

impl PointAggregator {
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            precision: config.precision,
            scale_base: config.scale_base,
            scale_step: config.scale_step,
            scale_max: config.scale_max,
            listed_dates: config.listed_dates.max(1),
            policy: CategoryPolicy::from(config),
        }
    }

    /// Visual scale of a cluster of `count` records.
    ///
    /// Grows with `ln(count)` so dense clusters stay readable.
    pub fn scale_for(&self, count: usize) -> f64 {
        let n = count.max(1) as f64;
        (self.scale_base + self.scale_step * n.ln()).min(self.scale_max)
    }

    /// Aggregate one metric dataset.
    pub fn aggregate(&self, metric_id: &str, records: &[RawRecord]) -> FeatureSet {
        let mut index: HashMap<(i64, i64), usize> = HashMap::new();
        let mut groups: Vec<Group<'_>> = Vec::new();
        let mut dropped = 0;

        for record in records {
            let Some((lon, lat)) = extract_coordinates(record) else {
                dropped += 1;
                continue;
            };
            let key = (grid_key(lon, self.precision), grid_key(lat, self.precision));

            let slot = *index.entry(key).or_insert_with(|| {
                groups.push(Group {
                    key,
                    members: Vec::new(),
                    dates: Vec::new(),
                });
                groups.len() - 1
            });

            let group = &mut groups[slot];
            group.members.push(record);
            if let Some(date) = extract_date(record) {
                group.dates.push(date);
            }
        }

        let mut bounds: Option<Bounds> = None;
        let features: Vec<AggregatedFeature> = groups
            .into_iter()
            .map(|group| {
                let feature = self.build_feature(metric_id, group);
                let [lon, lat] = feature.coordinates;
                match bounds.as_mut() {
                    Some(b) => b.extend(lon, lat),
                    None => bounds = Some(Bounds::from_point(lon, lat)),
                }
                feature
            })
            .collect();

        debug!(
            "Aggregated {} records of metric {} into {} features ({} dropped)",
            records.len(),
            metric_id,
            features.len(),
            dropped
        );

        FeatureSet {
            features,
            bounds,
            dropped,
        }
    }

    fn build_feature(&self, metric_id: &str, group: Group<'_>) -> AggregatedFeature {
        let coordinates = [
            from_grid_key(group.key.0, self.precision),
            from_grid_key(group.key.1, self.precision),
        ];
        let count = group.members.len();
        let earliest_date = group.dates.iter().min().copied();

        let mut properties = if count == 1 {
            group.members[0].clone()
        } else {
            let mut summary = self.policy.summarize(&group.members);
            if let Some(dates) = summarize_dates(&group.dates, self.listed_dates) {
                summary.insert(DATES_SUMMARY_FIELD.to_string(), Value::String(dates));
            }
            summary
        };
        stamp_date(&mut properties, earliest_date);

        AggregatedFeature {
            coordinates,
            properties,
            source_metric_id: metric_id.to_string(),
            is_aggregated: count > 1,
            count,
            scale: self.scale_for(count),
            earliest_date,
        }
    }
}

fn stamp_date(properties: &mut Map<String, Value>, date: Option<NaiveDate>) {
    match date {
        Some(d) => {
            properties.insert(STORED_DATE_FIELD.to_string(), json!(d.to_string()));
        }
        None => {
            properties.remove(STORED_DATE_FIELD);
        }
    }
}

/// The `n` features representing the most records, largest first.
pub fn densest_features(set: &FeatureSet, n: usize) -> Vec<&AggregatedFeature> {
    let mut features: Vec<&AggregatedFeature> =
        set.features.iter().filter(|f| f.is_aggregated).collect();
    features.sort_by_key(|f| std::cmp::Reverse(f.count));
    features.truncate(n);
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(lat: f64, lon: f64, extra: Value) -> RawRecord {
        let mut r = record(extra);
        r.insert("latitude".to_string(), json!(lat));
        r.insert("longitude".to_string(), json!(lon));
        r
    }

    #[test]
    fn test_groups_coincident_points() {
        let records = vec![
            at(37.7749, -122.4194, json!({"status": "open"})),
            at(37.774_900_2, -122.419_400_3, json!({"status": "closed"})),
            at(37.78, -122.40, json!({"status": "open"})),
        ];

        let set = PointAggregator::default().aggregate("m1", &records);
        assert_eq!(set.features.len(), 2);
        assert_eq!(set.features[0].count, 2);
        assert!(set.features[0].is_aggregated);
        assert_eq!(set.features[1].count, 1);
        assert!(!set.features[1].is_aggregated);
        assert_eq!(set.record_count(), 3);
    }

    #[test]
    fn test_close_points_merge_at_five_decimals() {
        // The second point differs in the sixth decimal, so it only merges
        // with the first once the grid is coarser than 1e-6.
        let records = vec![
            at(37.774900, -122.419400, json!({})),
            at(37.774901, -122.419401, json!({})),
            at(37.780000, -122.400000, json!({})),
        ];

        let fine = PointAggregator::default().aggregate("m1", &records);
        assert_eq!(fine.features.len(), 3);

        let coarse = PointAggregator::new(&AggregationConfig {
            precision: 5,
            ..AggregationConfig::default()
        })
        .aggregate("m1", &records);
        assert_eq!(coarse.features.len(), 2);
        assert_eq!(coarse.features[0].count, 2);
        assert!((coarse.features[0].coordinates[1] - 37.7749).abs() < 1e-9);
        assert!((coarse.features[0].coordinates[0] + 122.4194).abs() < 1e-9);
        assert_eq!(coarse.features[1].count, 1);
    }

    #[test]
    fn test_group_count_matches_group_size() {
        let records: Vec<RawRecord> = (0..25)
            .map(|i| at(40.0 + (i % 5) as f64 * 0.01, -75.0, json!({})))
            .collect();

        let set = PointAggregator::default().aggregate("m1", &records);
        assert_eq!(set.features.len(), 5);
        for feature in &set.features {
            assert_eq!(feature.count, 5);
            assert_eq!(feature.is_aggregated, feature.count > 1);
        }
    }

    #[test]
    fn test_invalid_records_dropped() {
        let records = vec![
            record(json!({"latitude": "n/a", "longitude": "n/a"})),
            record(json!({"name": "no location"})),
            at(37.0, -122.0, json!({})),
        ];
        let set = PointAggregator::default().aggregate("m1", &records);
        assert_eq!(set.features.len(), 1);
        assert_eq!(set.dropped, 2);
    }

    #[test]
    fn test_singleton_keeps_attributes_and_date() {
        let records = vec![at(37.0, -122.0, json!({"status": "open", "date": "2024-06-07"}))];
        let set = PointAggregator::default().aggregate("m1", &records);
        let feature = &set.features[0];

        assert_eq!(feature.properties["status"], "open");
        assert_eq!(feature.properties[STORED_DATE_FIELD], "2024-06-07");
        assert_eq!(feature.earliest_date, Some(date(2024, 6, 7)));
        assert_eq!(feature.source_metric_id, "m1");
    }

    #[test]
    fn test_cluster_summaries_and_earliest_date() {
        let records = vec![
            at(37.0, -122.0, json!({"type": "Graffiti", "date": "2024-06-05"})),
            at(37.0, -122.0, json!({"type": "Litter", "date": "2024-06-02"})),
            at(37.0, -122.0, json!({"type": "Graffiti", "date": "2024-06-09"})),
        ];
        let set = PointAggregator::default().aggregate("m1", &records);
        let feature = &set.features[0];

        assert_eq!(feature.count, 3);
        assert_eq!(feature.earliest_date, Some(date(2024, 6, 2)));
        assert_eq!(feature.properties["type"], "Graffiti, Litter");
        assert_eq!(
            feature.properties["dates"],
            "2024-06-02, 2024-06-05, 2024-06-09"
        );
        assert_eq!(feature.properties[STORED_DATE_FIELD], "2024-06-02");
    }

    #[test]
    fn test_scale_is_sublinear_and_capped() {
        let aggregator = PointAggregator::default();
        assert!((aggregator.scale_for(1) - 0.4).abs() < 1e-12);
        assert!((aggregator.scale_for(2) - (0.4 + 0.2 * 2f64.ln())).abs() < 1e-12);
        assert!(aggregator.scale_for(10) > aggregator.scale_for(2));
        assert_eq!(aggregator.scale_for(1_000_000), 1.5);
    }

    #[test]
    fn test_bounds_cover_all_features() {
        let records = vec![
            at(37.70, -122.50, json!({})),
            at(37.80, -122.30, json!({})),
            at(37.75, -122.40, json!({})),
        ];
        let bounds = PointAggregator::default()
            .aggregate("m1", &records)
            .bounds
            .unwrap();
        assert!((bounds.min_lat - 37.70).abs() < 1e-9);
        assert!((bounds.max_lat - 37.80).abs() < 1e-9);
        assert!((bounds.min_lon + 122.50).abs() < 1e-9);
        assert!((bounds.max_lon + 122.30).abs() < 1e-9);

        let empty = PointAggregator::default().aggregate("m1", &[]);
        assert!(empty.bounds.is_none());
    }

    #[test]
    fn test_densest_features() {
        let mut records = Vec::new();
        for _ in 0..4 {
            records.push(at(1.0, 1.0, json!({})));
        }
        for _ in 0..2 {
            records.push(at(2.0, 2.0, json!({})));
        }
        records.push(at(3.0, 3.0, json!({})));

        let set = PointAggregator::default().aggregate("m1", &records);
        let densest = densest_features(&set, 5);
        assert_eq!(densest.len(), 2);
        assert_eq!(densest[0].count, 4);
        assert_eq!(densest[1].count, 2);
    }
}
