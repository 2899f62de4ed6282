pub mod alert;
pub mod config;
pub mod logging;
pub mod nodes;
pub mod rule_store;
pub mod runtime;
mod types;
mod validate;

pub use alert::{AlertConfig, RetryConfig};
pub use config::CiraConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use nodes::NodeConfig;
pub use rule_store::RuleStoreConfig;
pub use runtime::RuntimeConfig;
pub use types::HumanDuration;
