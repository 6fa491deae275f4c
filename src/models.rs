use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::{GatewayError, Result};

pub const DEFAULT_STEP: &str = "15s";
pub const DEFAULT_WINDOW_SECS: i64 = 3600;

/// Query-string parameters accepted by the range endpoints.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RangeParams {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub step: Option<String>,
}

/// A resolved evaluation window for range queries, in epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
    pub step: String,
}

impl TimeRange {
    /// Fills the gaps in `params`: `end` defaults to `now`, `start` to one hour
    /// before `end`, `step` to `15s`.
    pub fn resolve(params: &RangeParams, now: i64) -> Result<Self> {
        let end = params.end.unwrap_or(now);
        let start = match params.start {
            Some(start) => start,
            None => end.checked_sub(DEFAULT_WINDOW_SECS).ok_or_else(|| {
                GatewayError::InvalidRange(format!("end {} leaves no room for a default start", end))
            })?,
        };

        if start > end {
            return Err(GatewayError::InvalidRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }

        let step = match params.step.as_deref().map(str::trim) {
            Some(step) if !step.is_empty() => step.to_string(),
            _ => DEFAULT_STEP.to_string(),
        };

        Ok(Self { start, end, step })
    }

    pub fn last_hour(now: i64) -> Self {
        Self {
            start: now - DEFAULT_WINDOW_SECS,
            end: now,
            step: DEFAULT_STEP.to_string(),
        }
    }
}

/// One `[timestamp, "value"]` pair as the backend delivers it.
///
/// Decoding never fails: a malformed pair keeps a NaN timestamp or an
/// unparsable value and is dropped during normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct RawSample(pub f64, pub Value);

impl From<Value> for RawSample {
    fn from(raw: Value) -> Self {
        if let Value::Array(pair) = &raw {
            if let [timestamp, value] = pair.as_slice() {
                return Self(timestamp.as_f64().unwrap_or(f64::NAN), value.clone());
            }
        }
        Self(f64::NAN, Value::Null)
    }
}

impl RawSample {
    /// `None` when the pair carried no usable timestamp.
    pub fn timestamp(&self) -> Option<f64> {
        Some(self.0).filter(|t| t.is_finite())
    }

    /// `None` for anything that does not parse to a finite number.
    pub fn parse_value(&self) -> Option<f64> {
        let value = match &self.1 {
            Value::String(text) => text.trim().parse::<f64>().ok(),
            Value::Number(number) => number.as_f64(),
            _ => None,
        };
        value.filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub t: DateTime<Utc>,
    pub v: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Chronologically ordered points; serialized as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Series {
    points: Vec<SeriesPoint>,
}

impl Series {
    pub fn new(points: Vec<SeriesPoint>) -> Self {
        Self { points }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeriesPoint> {
        self.points.iter()
    }

    pub fn map_values<F>(self, f: F) -> Self
    where
        F: FnMut(SeriesPoint) -> SeriesPoint,
    {
        Self {
            points: self.points.into_iter().map(f).collect(),
        }
    }
}

/// Series keyed by an entity label such as the container name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledSeriesSet {
    entries: BTreeMap<String, Series>,
}

impl LabeledSeriesSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later series for an existing key are appended to it, so two backend
    /// results falling back to the same label are not silently dropped.
    pub fn insert(&mut self, key: String, series: Series) {
        match self.entries.get_mut(&key) {
            Some(existing) => existing.points.extend(series.points),
            None => {
                self.entries.insert(key, series);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Series> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Series)> {
        self.entries.iter()
    }

    pub fn map_series<F>(self, mut f: F) -> Self
    where
        F: FnMut(Series) -> Series,
    {
        Self {
            entries: self
                .entries
                .into_iter()
                .map(|(key, series)| (key, f(series)))
                .collect(),
        }
    }
}

impl Serialize for LabeledSeriesSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Named<'a> {
            name: &'a str,
            values: &'a Series,
        }

        #[derive(Serialize)]
        struct Wire<'a> {
            series: Vec<Named<'a>>,
        }

        Wire {
            series: self
                .entries
                .iter()
                .map(|(name, values)| Named { name, values })
                .collect(),
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Uptime {
    pub uptime: String,
    pub seconds: f64,
}

impl Default for Uptime {
    fn default() -> Self {
        Self {
            uptime: "N/A".to_string(),
            seconds: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCounts {
    pub running: u64,
    pub blocked: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub value: f64,
    pub status: String,
    pub available: bool,
}

impl Default for Temperature {
    fn default() -> Self {
        Self {
            value: 0.0,
            status: "No Sensors".to_string(),
            available: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub name: String,
    /// Percent of one core.
    pub cpu: f64,
    /// Megabytes.
    pub memory: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerList {
    pub containers: Vec<ContainerUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_time_range_defaults() {
        let range = TimeRange::resolve(&RangeParams::default(), 10_000).unwrap();
        assert_eq!(
            range,
            TimeRange {
                start: 6_400,
                end: 10_000,
                step: "15s".to_string()
            }
        );
        assert_eq!(range, TimeRange::last_hour(10_000));
    }

    #[test]
    fn test_time_range_partial_params() {
        let params = RangeParams {
            start: None,
            end: Some(5_000),
            step: Some("  ".to_string()),
        };
        let range = TimeRange::resolve(&params, 10_000).unwrap();
        assert_eq!(range.start, 1_400);
        assert_eq!(range.end, 5_000);
        assert_eq!(range.step, "15s");
    }

    #[test]
    fn test_time_range_rejects_inverted_window() {
        let params = RangeParams {
            start: Some(200),
            end: Some(100),
            step: None,
        };
        assert!(matches!(
            TimeRange::resolve(&params, 1_000),
            Err(GatewayError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_time_range_default_start_cannot_underflow() {
        let params = RangeParams {
            start: None,
            end: Some(i64::MIN),
            step: None,
        };
        assert!(matches!(
            TimeRange::resolve(&params, 0),
            Err(GatewayError::InvalidRange(_))
        ));

        let explicit = RangeParams {
            start: Some(i64::MIN),
            end: Some(i64::MIN),
            step: None,
        };
        assert_eq!(TimeRange::resolve(&explicit, 0).unwrap().start, i64::MIN);
    }

    #[test]
    fn test_raw_sample_parsing() {
        assert_eq!(RawSample(1.0, "12.5".into()).parse_value(), Some(12.5));
        assert_eq!(RawSample(1.0, "NaN".into()).parse_value(), None);
        assert_eq!(RawSample(1.0, "+Inf".into()).parse_value(), None);
        assert_eq!(RawSample(1.0, "garbage".into()).parse_value(), None);
        assert_eq!(RawSample(1.0, Value::Null).parse_value(), None);
    }

    #[test]
    fn test_raw_sample_decodes_malformed_pairs() {
        let samples: Vec<RawSample> =
            serde_json::from_value(json!([[1, "1"], [2, null], "oops", [3], [4, 7.5]])).unwrap();

        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0].parse_value(), Some(1.0));
        assert_eq!(samples[1].timestamp(), Some(2.0));
        assert_eq!(samples[1].parse_value(), None);
        assert_eq!(samples[2].timestamp(), None);
        assert_eq!(samples[3].timestamp(), None);
        assert_eq!(samples[4].parse_value(), Some(7.5));
    }

    #[test]
    fn test_labeled_set_serializes_sorted() {
        let point = SeriesPoint {
            t: Utc.timestamp_opt(60, 0).unwrap(),
            v: 1.5,
            unit: None,
        };
        let mut set = LabeledSeriesSet::new();
        set.insert("redis".into(), Series::new(vec![point.clone()]));
        set.insert("nginx".into(), Series::empty());

        let value = serde_json::to_value(&set).unwrap();
        assert_eq!(
            value,
            json!({
                "series": [
                    { "name": "nginx", "values": [] },
                    { "name": "redis", "values": [{ "t": "1970-01-01T00:01:00Z", "v": 1.5 }] }
                ]
            })
        );
    }

    #[test]
    fn test_placeholder_defaults() {
        assert_eq!(
            serde_json::to_value(Uptime::default()).unwrap(),
            json!({ "uptime": "N/A", "seconds": 0.0 })
        );
        assert_eq!(
            serde_json::to_value(Temperature::default()).unwrap(),
            json!({ "value": 0.0, "status": "No Sensors", "available": false })
        );
        assert_eq!(
            serde_json::to_value(ProcessCounts::default()).unwrap(),
            json!({ "running": 0, "blocked": 0, "total": 0 })
        );
    }
}
