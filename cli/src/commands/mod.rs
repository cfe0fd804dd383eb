pub mod metrics;
pub mod notify;
pub mod processes;
pub mod snapshot;
pub mod status;

pub use metrics::MetricsArgs;
pub use notify::NotifyArgs;
pub use processes::ProcessesArgs;
pub use snapshot::SnapshotArgs;
pub use status::StatusArgs;
