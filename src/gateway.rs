//! Per-metric orchestration: build the query, run it, normalize the answer and
//! derive the fields each dashboard panel expects.
//!
//! Backend failures stop here. Series endpoints degrade to an empty series and
//! scalar endpoints to their documented placeholder; only caller mistakes
//! (unknown metric, bad range or query) come back as errors.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::metrics;
use crate::models::{
    ContainerList, ContainerUsage, LabeledSeriesSet, LoadAverage, ProcessCounts, Series,
    Temperature, TimeRange, Uptime,
};
use crate::query::catalog::{self, CONTAINER_MEMORY_BY_NAME, TEMPERATURE_CANDIDATES};
use crate::query::normalize::{self, round_to, CONTAINER_LABEL_KEYS, METRIC_NAME_LABEL};
use crate::query::{
    execute, MetricName, MetricQuery, QueryBackend, QueryFailure, QueryResponse, UnitPolicy,
    ValueUnit,
};
use crate::{GatewayError, Result};

pub const DEFAULT_PRECISION: u32 = 2;
pub const TEMPERATURE_PRECISION: u32 = 1;

const TEMPERATURE_WARNING: f64 = 70.0;
const TEMPERATURE_CRITICAL: f64 = 85.0;

/// `90000` becomes `"1d 1h 0m"`.
pub fn format_uptime(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    format!("{}d {}h {}m", days, hours, minutes)
}

pub fn temperature_status(celsius: f64) -> &'static str {
    if celsius >= TEMPERATURE_CRITICAL {
        "Critical"
    } else if celsius >= TEMPERATURE_WARNING {
        "Warning"
    } else {
        "Normal"
    }
}

fn unit_policy(unit: ValueUnit) -> UnitPolicy {
    match unit {
        ValueUnit::BytesPerSecond => UnitPolicy::ByteRate,
        _ => UnitPolicy::AsIs,
    }
}

fn round_series(series: Series) -> Series {
    series.map_values(|mut point| {
        point.v = round_to(point.v, DEFAULT_PRECISION);
        point
    })
}

fn as_count(value: Option<&f64>) -> u64 {
    value.map(|v| v.max(0.0).round() as u64).unwrap_or(0)
}

fn degraded(metric: &str, failure: &QueryFailure) {
    warn!("Serving default for {}: {}", metric, failure);
    metrics::record_degraded(metric);
}

#[derive(Clone)]
pub struct MetricsGateway {
    backend: Arc<dyn QueryBackend>,
}

impl MetricsGateway {
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self { backend }
    }

    /// Runs a catalog query; `None` means the caller should serve its default.
    async fn run(&self, metric: &MetricQuery, range: Option<&TimeRange>) -> Option<QueryResponse> {
        let built = catalog::build_for(metric, range);
        match execute(self.backend.as_ref(), &built).await {
            Ok(response) => {
                if response.results().is_empty() {
                    debug!("No data for {}", metric.name);
                }
                Some(response)
            }
            Err(failure) => {
                degraded(metric.name.as_str(), &failure);
                None
            }
        }
    }

    async fn run_instant(&self, label: &str, expression: &str) -> Option<QueryResponse> {
        match self.backend.instant(expression).await {
            Ok(response) => Some(response),
            Err(failure) => {
                degraded(label, &failure);
                None
            }
        }
    }

    /// Chart data for a single-series metric.
    pub async fn series(&self, name: MetricName, range: &TimeRange) -> Result<Series> {
        let metric = catalog::lookup(name);
        if !metric.requires_range || is_labeled(name) {
            return Err(GatewayError::InvalidQuery(format!(
                "{} is not a single-series metric",
                name
            )));
        }

        let Some(response) = self.run(metric, Some(range)).await else {
            return Ok(Series::empty());
        };

        let series = normalize::single_series(&response, unit_policy(metric.unit));
        Ok(round_series(series))
    }

    /// Chart data for a per-container metric, one series per container.
    pub async fn labeled_series(
        &self,
        name: MetricName,
        range: &TimeRange,
    ) -> Result<LabeledSeriesSet> {
        if !is_labeled(name) {
            return Err(GatewayError::InvalidQuery(format!(
                "{} is not a per-container metric",
                name
            )));
        }
        let metric = catalog::lookup(name);

        let Some(response) = self.run(metric, Some(range)).await else {
            return Ok(LabeledSeriesSet::new());
        };

        Ok(
            normalize::labeled_series(&response, &CONTAINER_LABEL_KEYS, unit_policy(metric.unit))
                .map_series(round_series),
        )
    }

    pub async fn uptime(&self) -> Uptime {
        let metric = catalog::lookup(MetricName::Uptime);
        let seconds = match self.run(metric, None).await {
            Some(response) => normalize::instant_scalar(&response),
            None => None,
        };

        match seconds {
            Some(seconds) => Uptime {
                uptime: format_uptime(seconds),
                seconds: round_to(seconds, DEFAULT_PRECISION),
            },
            None => Uptime::default(),
        }
    }

    pub async fn load(&self) -> LoadAverage {
        let metric = catalog::lookup(MetricName::Load);
        let Some(response) = self.run(metric, None).await else {
            return LoadAverage::default();
        };

        let by_name = normalize::instant_by_label(&response, &METRIC_NAME_LABEL);
        let pick = |key: &str| round_to(by_name.get(key).copied().unwrap_or(0.0), DEFAULT_PRECISION);
        LoadAverage {
            load1: pick("node_load1"),
            load5: pick("node_load5"),
            load15: pick("node_load15"),
        }
    }

    pub async fn processes(&self) -> ProcessCounts {
        let metric = catalog::lookup(MetricName::Processes);
        let Some(response) = self.run(metric, None).await else {
            return ProcessCounts::default();
        };

        let by_name = normalize::instant_by_label(&response, &METRIC_NAME_LABEL);
        let running = as_count(by_name.get("node_procs_running"));
        let blocked = as_count(by_name.get("node_procs_blocked"));
        ProcessCounts {
            running,
            blocked,
            total: running + blocked,
        }
    }

    /// Tries each sensor expression in turn and reports the first with data.
    pub async fn temperature(&self) -> Temperature {
        for expression in TEMPERATURE_CANDIDATES {
            let Some(response) = self.run_instant("temperature", expression).await else {
                continue;
            };
            if let Some(celsius) = normalize::instant_scalar(&response) {
                let value = round_to(celsius, TEMPERATURE_PRECISION);
                return Temperature {
                    value,
                    status: temperature_status(value).to_string(),
                    available: true,
                };
            }
            debug!("No temperature data from {}", expression);
        }

        metrics::record_degraded("temperature");
        Temperature::default()
    }

    /// Current CPU and memory per container. Containers reporting neither are
    /// left out.
    pub async fn containers(&self) -> ContainerList {
        let metric = catalog::lookup(MetricName::ContainerList);
        let (cpu, memory) = futures::join!(
            self.run(metric, None),
            self.run_instant("container_memory", CONTAINER_MEMORY_BY_NAME),
        );

        let cpu = cpu
            .map(|r| normalize::instant_by_label(&r, &CONTAINER_LABEL_KEYS))
            .unwrap_or_default();
        let memory = memory
            .map(|r| normalize::instant_by_label(&r, &CONTAINER_LABEL_KEYS))
            .unwrap_or_default();

        ContainerList {
            containers: merge_containers(&cpu, &memory),
        }
    }

    /// Runs an arbitrary expression as a range query for the explorer view.
    pub async fn raw_range(&self, expression: &str, range: &TimeRange) -> Result<QueryResponse> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(GatewayError::InvalidQuery("query must not be empty".to_string()));
        }

        info!("Explorer range query: {}", expression);
        match self.backend.range(expression, range).await {
            Ok(response) => Ok(response),
            Err(failure) => {
                degraded("query_range_raw", &failure);
                Ok(QueryResponse::empty_matrix())
            }
        }
    }

    pub async fn backend_reachable(&self) -> bool {
        self.backend.instant("vector(1)").await.is_ok()
    }
}

fn is_labeled(name: MetricName) -> bool {
    matches!(name, MetricName::ContainerCpu | MetricName::ContainerMemory)
}

pub fn merge_containers(
    cpu: &BTreeMap<String, f64>,
    memory: &BTreeMap<String, f64>,
) -> Vec<ContainerUsage> {
    let names: BTreeSet<&String> = cpu.keys().chain(memory.keys()).collect();

    names
        .into_iter()
        .filter_map(|name| {
            let cpu = round_to(cpu.get(name).copied().unwrap_or(0.0), DEFAULT_PRECISION);
            let memory = round_to(memory.get(name).copied().unwrap_or(0.0), DEFAULT_PRECISION);
            if cpu == 0.0 && memory == 0.0 {
                return None;
            }
            Some(ContainerUsage {
                name: name.clone(),
                cpu,
                memory,
            })
        })
        .collect()
}
