pub mod dispatcher;
pub mod observability;
pub mod pipeline;
pub mod reload;
pub mod state;
pub mod stream_pump;
pub mod upstream_client;

pub use dispatcher::Dispatcher;
pub use observability::{NoopTap, ObservabilityTap, PrometheusTap, RequestLabels};
pub use pipeline::TransformPipeline;
pub use state::AppState;
pub use stream_pump::{pump, PumpOutcome};
