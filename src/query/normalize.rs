//! Reshapes backend results into [`Series`] and [`LabeledSeriesSet`].
//!
//! Nothing in here fails. Missing data, unparsable samples and absent keys all
//! collapse into empty output so a partial backend answer never takes down a
//! dashboard panel.

use std::collections::{BTreeMap, HashMap};

use chrono::{TimeZone, Utc};
use tracing::debug;

use crate::models::{LabeledSeriesSet, RawSample, Series, SeriesPoint};
use crate::query::executor::{QueryResponse, ResultSeries};

pub const UNKNOWN_LABEL: &str = "unknown";

/// Label keys tried in order when naming a container series.
pub const CONTAINER_LABEL_KEYS: [&str; 4] = ["name", "container_name", "container", "id"];

/// Label carrying the metric name in results of `{__name__=~"..."}` selectors.
pub const METRIC_NAME_LABEL: [&str; 1] = ["__name__"];

const BYTE_RATE_UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
const BYTE_RATE_PRECISION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPolicy {
    /// Values pass through untouched.
    AsIs,
    /// Each sample is scaled into the largest byte-rate unit keeping it below 1024.
    ByteRate,
}

pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// Picks the largest unit in B/s..GB/s that keeps `|value| < 1024` once the
/// value is rounded to two decimals.
pub fn humanize_byte_rate(value: f64) -> (f64, &'static str) {
    let mut scaled = value;
    let mut unit = 0;
    while round_to(scaled, BYTE_RATE_PRECISION).abs() >= 1024.0
        && unit < BYTE_RATE_UNITS.len() - 1
    {
        scaled /= 1024.0;
        unit += 1;
    }
    (round_to(scaled, BYTE_RATE_PRECISION), BYTE_RATE_UNITS[unit])
}

fn to_point(sample: &RawSample, policy: UnitPolicy) -> Option<SeriesPoint> {
    let value = sample.parse_value()?;
    let millis = (sample.timestamp()? * 1000.0).round() as i64;
    let t = Utc.timestamp_millis_opt(millis).single()?;

    Some(match policy {
        UnitPolicy::AsIs => SeriesPoint { t, v: value, unit: None },
        UnitPolicy::ByteRate => {
            let (v, unit) = humanize_byte_rate(value);
            SeriesPoint {
                t,
                v,
                unit: Some(unit.to_string()),
            }
        }
    })
}

fn series_from(result: &ResultSeries, policy: UnitPolicy) -> Series {
    let samples: &[RawSample] = match (&result.values, &result.value) {
        (Some(values), _) => values,
        (None, Some(value)) => std::slice::from_ref(value),
        (None, None) => &[],
    };

    let points: Vec<SeriesPoint> = samples
        .iter()
        .filter_map(|sample| to_point(sample, policy))
        .collect();

    if points.len() < samples.len() {
        debug!(
            "Skipped {} non-numeric samples",
            samples.len() - points.len()
        );
    }

    Series::new(points)
}

/// The first result's samples as a single series.
pub fn single_series(response: &QueryResponse, policy: UnitPolicy) -> Series {
    match response.results().first() {
        Some(first) => series_from(first, policy),
        None => {
            debug!("Backend returned no result series");
            Series::empty()
        }
    }
}

/// First present, non-empty label among `keys`, else [`UNKNOWN_LABEL`].
pub fn label_for<'a>(labels: &'a HashMap<String, String>, keys: &[&str]) -> &'a str {
    keys.iter()
        .filter_map(|key| labels.get(*key))
        .find(|value| !value.is_empty())
        .map(String::as_str)
        .unwrap_or(UNKNOWN_LABEL)
}

/// One series per result, keyed by the first matching label in `keys`.
pub fn labeled_series(
    response: &QueryResponse,
    keys: &[&str],
    policy: UnitPolicy,
) -> LabeledSeriesSet {
    let mut set = LabeledSeriesSet::new();
    for result in response.results() {
        let key = label_for(&result.metric, keys).to_string();
        set.insert(key, series_from(result, policy));
    }
    set
}

/// Value of the first result's single sample, if it parses.
pub fn instant_scalar(response: &QueryResponse) -> Option<f64> {
    response
        .results()
        .first()
        .and_then(|result| result.value.as_ref())
        .and_then(RawSample::parse_value)
}

/// Instant values keyed by label. For duplicate keys the first result wins.
pub fn instant_by_label(response: &QueryResponse, keys: &[&str]) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for result in response.results() {
        let Some(value) = result.value.as_ref().and_then(RawSample::parse_value) else {
            continue;
        };
        out.entry(label_for(&result.metric, keys).to_string())
            .or_insert(value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::executor::QueryData;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn decode(value: serde_json::Value) -> QueryResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_byte_rate_conversion() {
        assert_eq!(humanize_byte_rate(500.0), (500.0, "B/s"));
        assert_eq!(humanize_byte_rate(2048.0), (2.0, "KB/s"));
        assert_eq!(humanize_byte_rate(1_572_864.0), (1.5, "MB/s"));
        assert_eq!(humanize_byte_rate(1023.0), (1023.0, "B/s"));
        assert_eq!(humanize_byte_rate(1024.0), (1.0, "KB/s"));
        assert_eq!(humanize_byte_rate(1_048_575.0), (1.0, "MB/s"));
        assert_eq!(humanize_byte_rate(1023.999), (1.0, "KB/s"));
        assert_eq!(humanize_byte_rate(3.0 * 1024f64.powi(3)), (3.0, "GB/s"));
        // GB/s is the ceiling.
        assert_eq!(humanize_byte_rate(2048.0 * 1024f64.powi(3)), (2048.0, "GB/s"));
    }

    #[test]
    fn test_range_series_keeps_length_and_order() {
        let response = decode(json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [
                    { "metric": {}, "values": [[30, "3"], [10, "1"], [20, "2"]] },
                    { "metric": {}, "values": [[10, "99"]] }
                ]
            }
        }));

        let series = single_series(&response, UnitPolicy::AsIs);
        assert_eq!(series.len(), 3);
        let values: Vec<f64> = series.iter().map(|p| p.v).collect();
        assert_eq!(values, vec![3.0, 1.0, 2.0]);
        assert_eq!(series.points()[0].t.timestamp(), 30);
        assert!(series.iter().all(|p| p.unit.is_none()));
    }

    #[test]
    fn test_non_numeric_samples_skipped() {
        let response = decode(json!({
            "status": "success",
            "data": { "result": [{ "values": [[1, "NaN"], [2, "4.5"], [3, "+Inf"], [4, "x"]] }] }
        }));
        let series = single_series(&response, UnitPolicy::AsIs);
        assert_eq!(series.len(), 1);
        assert_eq!(series.points()[0].v, 4.5);
    }

    #[test]
    fn test_malformed_pairs_skipped_individually() {
        let response = decode(json!({
            "status": "success",
            "data": { "result": [{ "values": [[1, "1"], [2, null], [3, "3"], ["late", "4"], [5]] }] }
        }));
        let series = single_series(&response, UnitPolicy::AsIs);
        let got: Vec<(i64, f64)> = series.iter().map(|p| (p.t.timestamp(), p.v)).collect();
        assert_eq!(got, vec![(1, 1.0), (3, 3.0)]);
    }

    #[test]
    fn test_missing_shapes_normalize_to_empty() {
        let shapes = vec![
            json!({ "status": "success" }),
            json!({ "status": "success", "data": {} }),
            json!({ "status": "success", "data": { "result": [] } }),
            json!({ "status": "success", "data": { "result": [{ "metric": {} }] } }),
        ];
        for shape in shapes {
            let response = decode(shape.clone());
            assert!(single_series(&response, UnitPolicy::AsIs).is_empty(), "{}", shape);
            assert!(labeled_series(&response, &CONTAINER_LABEL_KEYS, UnitPolicy::AsIs)
                .iter()
                .all(|(_, s)| s.is_empty()));
            assert_eq!(instant_scalar(&response), None);
        }
        assert!(single_series(&QueryResponse::default(), UnitPolicy::AsIs).is_empty());
    }

    #[test]
    fn test_instant_value_becomes_one_point() {
        let response = decode(json!({
            "status": "success",
            "data": { "result": [{ "metric": {}, "value": [1700000000.25, "42"] }] }
        }));
        let series = single_series(&response, UnitPolicy::AsIs);
        assert_eq!(series.len(), 1);
        assert_eq!(series.points()[0].t.timestamp_millis(), 1_700_000_000_250);
        assert_eq!(instant_scalar(&response), Some(42.0));
    }

    #[test]
    fn test_byte_rate_applied_per_sample() {
        let response = decode(json!({
            "status": "success",
            "data": { "result": [{ "values": [[1, "500"], [2, "2048"], [3, "1572864"]] }] }
        }));
        let series = single_series(&response, UnitPolicy::ByteRate);
        let got: Vec<(f64, Option<String>)> =
            series.iter().map(|p| (p.v, p.unit.clone())).collect();
        assert_eq!(
            got,
            vec![
                (500.0, Some("B/s".to_string())),
                (2.0, Some("KB/s".to_string())),
                (1.5, Some("MB/s".to_string())),
            ]
        );
    }

    #[test]
    fn test_label_fallback_chain() {
        let mut labels = HashMap::new();
        assert_eq!(label_for(&labels, &CONTAINER_LABEL_KEYS), "unknown");

        labels.insert("id".to_string(), "/docker/abc".to_string());
        assert_eq!(label_for(&labels, &CONTAINER_LABEL_KEYS), "/docker/abc");

        labels.insert("container".to_string(), "web".to_string());
        assert_eq!(label_for(&labels, &CONTAINER_LABEL_KEYS), "web");

        labels.insert("name".to_string(), String::new());
        assert_eq!(label_for(&labels, &CONTAINER_LABEL_KEYS), "web");

        labels.insert("name".to_string(), "nginx".to_string());
        assert_eq!(label_for(&labels, &CONTAINER_LABEL_KEYS), "nginx");
    }

    #[test]
    fn test_labeled_series_groups_by_name() {
        let response = decode(json!({
            "status": "success",
            "data": { "result": [
                { "metric": { "name": "nginx" }, "values": [[1, "1"], [2, "2"]] },
                { "metric": { "name": "redis" }, "values": [[1, "5"]] },
                { "metric": {}, "values": [[1, "7"]] }
            ] }
        }));
        let set = labeled_series(&response, &CONTAINER_LABEL_KEYS, UnitPolicy::AsIs);
        assert_eq!(set.len(), 3);
        assert_eq!(set.get("nginx").unwrap().len(), 2);
        assert_eq!(set.get("redis").unwrap().points()[0].v, 5.0);
        assert_eq!(set.get("unknown").unwrap().points()[0].v, 7.0);
    }

    #[test]
    fn test_instant_by_label() {
        let response = decode(json!({
            "status": "success",
            "data": { "result": [
                { "metric": { "__name__": "node_load1" }, "value": [1, "0.5"] },
                { "metric": { "__name__": "node_load5" }, "value": [1, "NaN"] },
                { "metric": { "__name__": "node_load15" }, "value": [1, "0.25"] }
            ] }
        }));
        let by_name = instant_by_label(&response, &METRIC_NAME_LABEL);
        assert_eq!(by_name.len(), 2);
        assert_eq!(by_name["node_load1"], 0.5);
        assert_eq!(by_name["node_load15"], 0.25);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let response = QueryResponse {
            status: "success".into(),
            data: Some(QueryData {
                result_type: "matrix".into(),
                result: vec![ResultSeries {
                    metric: HashMap::new(),
                    value: None,
                    values: Some(vec![RawSample(1.0, "1".into()), RawSample(2.0, "2".into())]),
                }],
            }),
            error_type: None,
            error: None,
        };
        assert_eq!(
            single_series(&response, UnitPolicy::ByteRate),
            single_series(&response, UnitPolicy::ByteRate)
        );
    }
}
