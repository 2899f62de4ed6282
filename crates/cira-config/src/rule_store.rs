use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// `[rule_store]` — on-disk location of atomic/composite rule definitions.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RuleStoreConfig {
    /// Overrides the `<config-root>` resolution order (`CIRA_HOME` env var,
    /// else `$HOME/.cira`) when set.
    pub root: Option<PathBuf>,
}

impl RuleStoreConfig {
    /// Resolve `<config-root>` per `CIRA_HOME`, an explicit `root` override,
    /// then `$HOME/.cira`.
    pub fn resolve_root(&self) -> anyhow::Result<PathBuf> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        if let Ok(home) = std::env::var("CIRA_HOME") {
            return Ok(PathBuf::from(home));
        }
        let home = std::env::var("HOME")
            .map_err(|_| anyhow::anyhow!("cannot resolve rule store root: CIRA_HOME is unset and HOME is unset"))?;
        Ok(PathBuf::from(home).join(".cira"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_root_wins() {
        let cfg = RuleStoreConfig {
            root: Some(PathBuf::from("/opt/cira")),
        };
        assert_eq!(cfg.resolve_root().unwrap(), PathBuf::from("/opt/cira"));
    }
}
