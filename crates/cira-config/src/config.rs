use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::alert::AlertConfig;
use crate::logging::LoggingConfig;
use crate::nodes::NodeConfig;
use crate::rule_store::RuleStoreConfig;
use crate::runtime::RuntimeConfig;
use crate::validate;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CiraConfigRaw {
    runtime: RuntimeConfig,
    alert: AlertConfig,
    logging: LoggingConfig,
    rule_store: RuleStoreConfig,
    nodes: Vec<NodeConfig>,
}

impl Default for CiraConfigRaw {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            alert: AlertConfig {
                sinks: vec!["log://".to_string()],
                retry: Default::default(),
                dedup_window: crate::HumanDuration::from(std::time::Duration::from_secs(60)),
            },
            logging: LoggingConfig::default(),
            rule_store: RuleStoreConfig::default(),
            nodes: Vec::new(),
        }
    }
}

/// Resolved, validated process configuration for `cira-gateway`.
#[derive(Debug)]
pub struct CiraConfig {
    pub runtime: RuntimeConfig,
    pub alert: AlertConfig,
    pub logging: LoggingConfig,
    pub rule_store: RuleStoreConfig,
    pub nodes: Vec<NodeConfig>,
}

impl CiraConfig {
    /// Read and parse a `cira.toml` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }

    /// The configuration a fresh install gets when no `cira.toml` is found.
    pub fn defaults() -> Self {
        CiraConfigRaw::default().into_resolved()
    }
}

impl CiraConfigRaw {
    fn into_resolved(self) -> CiraConfig {
        CiraConfig {
            runtime: self.runtime,
            alert: self.alert,
            logging: self.logging,
            rule_store: self.rule_store,
            nodes: self.nodes,
        }
    }
}

impl FromStr for CiraConfig {
    type Err = anyhow::Error;

    /// Parse a TOML string into a resolved, validated [`CiraConfig`].
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let raw: CiraConfigRaw = toml::from_str(toml_str)?;
        let config = raw.into_resolved();
        validate::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_TOML: &str = r#"
[runtime]
tick_interval = "1s"
fetch_parallelism = 8
fetch_timeout = "2s"
rule_exec_timeout = "50ms"

[alert]
sinks = ["file:///var/log/cira-alerts.jsonl"]

[alert.retry]
base_delay = "1s"
factor = 2
max_attempts = 5
max_delay = "30s"

[logging]
level = "info"

[rule_store]
root = "/opt/cira"

[[nodes]]
id = "jetson-1"
base_url = "http://10.0.1.12:8080"
"#;

    #[test]
    fn load_full_toml() {
        let cfg: CiraConfig = FULL_TOML.parse().unwrap();
        assert_eq!(cfg.runtime.fetch_parallelism, 8);
        assert_eq!(cfg.alert.sinks, vec!["file:///var/log/cira-alerts.jsonl"]);
        assert_eq!(cfg.alert.retry.max_attempts, 5);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(
            cfg.rule_store.root,
            Some(std::path::PathBuf::from("/opt/cira"))
        );
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.nodes[0].id, "jetson-1");
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = CiraConfig::defaults();
        assert_eq!(cfg.runtime.fetch_parallelism, 8);
    }

    #[test]
    fn reject_zero_fetch_parallelism() {
        let toml = FULL_TOML.replace("fetch_parallelism = 8", "fetch_parallelism = 0");
        assert!(toml.parse::<CiraConfig>().is_err());
    }

    #[test]
    fn reject_zero_max_attempts() {
        let toml = FULL_TOML.replace("max_attempts = 5", "max_attempts = 0");
        assert!(toml.parse::<CiraConfig>().is_err());
    }

    #[test]
    fn reject_unknown_sink_scheme() {
        let toml = FULL_TOML.replace(
            "file:///var/log/cira-alerts.jsonl",
            "carrier-pigeon://nowhere",
        );
        assert!(toml.parse::<CiraConfig>().is_err());
    }

    #[test]
    fn empty_config_falls_back_to_defaults() {
        let cfg: CiraConfig = "".parse().unwrap();
        assert_eq!(cfg.runtime.fetch_parallelism, 8);
        assert_eq!(cfg.alert.sinks, vec!["log://".to_string()]);
    }
}
