pub mod catalog;
pub mod executor;
pub mod normalize;

pub use catalog::{build, BuiltQuery, MetricName, MetricQuery, QueryKind, ValueUnit};
pub use executor::{
    execute, PrometheusClient, QueryBackend, QueryFailure, QueryResponse, QueryResult,
};
pub use normalize::UnitPolicy;
