//! The fixed set of logical metrics and the backend expressions behind them.
//!
//! Expressions are PromQL and must stay byte-for-byte compatible with what the
//! node exporter and cAdvisor publish. Label filters such as `device!="lo"` or
//! the pseudo-filesystem exclusion on disk usage change the meaning of the
//! result if dropped.

use std::fmt;
use std::str::FromStr;

use crate::models::TimeRange;
use crate::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    Cpu,
    Memory,
    Disk,
    NetworkRx,
    NetworkTx,
    Uptime,
    Load,
    Processes,
    ContainerList,
    ContainerCpu,
    ContainerMemory,
    Temperature,
}

impl MetricName {
    pub const ALL: [MetricName; 12] = [
        MetricName::Cpu,
        MetricName::Memory,
        MetricName::Disk,
        MetricName::NetworkRx,
        MetricName::NetworkTx,
        MetricName::Uptime,
        MetricName::Load,
        MetricName::Processes,
        MetricName::ContainerList,
        MetricName::ContainerCpu,
        MetricName::ContainerMemory,
        MetricName::Temperature,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Cpu => "cpu",
            MetricName::Memory => "memory",
            MetricName::Disk => "disk",
            MetricName::NetworkRx => "network_rx",
            MetricName::NetworkTx => "network_tx",
            MetricName::Uptime => "uptime",
            MetricName::Load => "load",
            MetricName::Processes => "processes",
            MetricName::ContainerList => "container_list",
            MetricName::ContainerCpu => "container_cpu",
            MetricName::ContainerMemory => "container_memory",
            MetricName::Temperature => "temperature",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        MetricName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| GatewayError::UnknownMetric(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueUnit {
    Percent,
    BytesPerSecond,
    Megabytes,
    Count,
    Celsius,
    Seconds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Instant,
    Range,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Instant => "instant",
            QueryKind::Range => "range",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    pub name: MetricName,
    pub expression: &'static str,
    pub unit: ValueUnit,
    pub requires_range: bool,
}

/// Output of [`build`]: what to send to the backend and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltQuery {
    pub expression: String,
    pub kind: QueryKind,
    /// Only set for range queries, and only when the caller supplied a window.
    pub range: Option<TimeRange>,
}

pub const CONTAINER_CPU_BY_NAME: &str =
    r#"sum by (name) (rate(container_cpu_usage_seconds_total{name!=""}[1m])) * 100"#;

pub const CONTAINER_MEMORY_BY_NAME: &str =
    r#"sum by (name) (container_memory_usage_bytes{name!=""}) / 1024 / 1024"#;

/// Tried in order; the first expression with data wins.
pub const TEMPERATURE_CANDIDATES: [&str; 2] = [
    "max(node_hwmon_temp_celsius)",
    "max(node_thermal_zone_temp)",
];

static CATALOG: [MetricQuery; 12] = [
    MetricQuery {
        name: MetricName::Cpu,
        expression: r#"100 - (avg by(instance)(irate(node_cpu_seconds_total{mode="idle"}[1m])) * 100)"#,
        unit: ValueUnit::Percent,
        requires_range: true,
    },
    MetricQuery {
        name: MetricName::Memory,
        expression: "(1 - (node_memory_MemAvailable_bytes / node_memory_MemTotal_bytes)) * 100",
        unit: ValueUnit::Percent,
        requires_range: true,
    },
    MetricQuery {
        name: MetricName::Disk,
        expression: r#"100 - (node_filesystem_free_bytes{fstype!~"tmpfs|fuse.lxcfs|overlay"} / node_filesystem_size_bytes{fstype!~"tmpfs|fuse.lxcfs|overlay"} * 100)"#,
        unit: ValueUnit::Percent,
        requires_range: true,
    },
    MetricQuery {
        name: MetricName::NetworkRx,
        expression: r#"irate(node_network_receive_bytes_total{device!="lo"}[1m])"#,
        unit: ValueUnit::BytesPerSecond,
        requires_range: true,
    },
    MetricQuery {
        name: MetricName::NetworkTx,
        expression: r#"irate(node_network_transmit_bytes_total{device!="lo"}[1m])"#,
        unit: ValueUnit::BytesPerSecond,
        requires_range: true,
    },
    MetricQuery {
        name: MetricName::Uptime,
        expression: "node_time_seconds - node_boot_time_seconds",
        unit: ValueUnit::Seconds,
        requires_range: false,
    },
    MetricQuery {
        name: MetricName::Load,
        expression: r#"{__name__=~"node_load1|node_load5|node_load15"}"#,
        unit: ValueUnit::Count,
        requires_range: false,
    },
    MetricQuery {
        name: MetricName::Processes,
        expression: r#"{__name__=~"node_procs_running|node_procs_blocked"}"#,
        unit: ValueUnit::Count,
        requires_range: false,
    },
    MetricQuery {
        name: MetricName::ContainerList,
        expression: CONTAINER_CPU_BY_NAME,
        unit: ValueUnit::Percent,
        requires_range: false,
    },
    MetricQuery {
        name: MetricName::ContainerCpu,
        expression: CONTAINER_CPU_BY_NAME,
        unit: ValueUnit::Percent,
        requires_range: true,
    },
    MetricQuery {
        name: MetricName::ContainerMemory,
        expression: CONTAINER_MEMORY_BY_NAME,
        unit: ValueUnit::Megabytes,
        requires_range: true,
    },
    MetricQuery {
        name: MetricName::Temperature,
        expression: TEMPERATURE_CANDIDATES[0],
        unit: ValueUnit::Celsius,
        requires_range: false,
    },
];

pub fn lookup(name: MetricName) -> &'static MetricQuery {
    // CATALOG is declared in variant order.
    &CATALOG[name as usize]
}

/// Resolves a logical metric name into the expression and query kind to run.
pub fn build(name: &str, range: Option<&TimeRange>) -> Result<BuiltQuery> {
    let metric = lookup(name.parse()?);
    Ok(build_for(metric, range))
}

pub fn build_for(metric: &MetricQuery, range: Option<&TimeRange>) -> BuiltQuery {
    if metric.requires_range {
        BuiltQuery {
            expression: metric.expression.to_string(),
            kind: QueryKind::Range,
            range: range.cloned(),
        }
    } else {
        BuiltQuery {
            expression: metric.expression.to_string(),
            kind: QueryKind::Instant,
            range: None,
        }
    }
}
