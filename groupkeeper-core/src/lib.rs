pub mod config;
pub mod core_lifecycle;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use core_lifecycle::{
    GroupKeyEngine, LifecycleError, LifecycleResult, MembershipReconciler, ReconcileReport,
};
pub use logging::{init_logging, LogLevel};
