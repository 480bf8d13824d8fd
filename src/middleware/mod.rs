pub mod logging;
pub mod metrics;

pub use logging::RequestTracing;
pub use metrics::EndpointMetrics;
