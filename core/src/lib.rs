pub mod commit;
pub mod config;
pub mod errors;
pub mod partition;
pub mod position;
pub mod rebalance;
pub mod reconcile;
pub mod sink;
pub mod source;
pub mod task;
pub mod telemetry;
pub mod transcode;
