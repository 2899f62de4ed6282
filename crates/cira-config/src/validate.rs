use crate::config::CiraConfig;

const KNOWN_SINK_SCHEMES: &[&str] = &["file", "log", "modbus"];

/// Internal validation, called automatically during `CiraConfig::from_str` / `load`.
pub(crate) fn validate(config: &CiraConfig) -> anyhow::Result<()> {
    if config.runtime.fetch_parallelism == 0 {
        anyhow::bail!("runtime.fetch_parallelism must be > 0");
    }
    if config.runtime.tick_interval.as_millis() == 0 {
        anyhow::bail!("runtime.tick_interval must be > 0");
    }
    if config.runtime.fetch_timeout.as_millis() == 0 {
        anyhow::bail!("runtime.fetch_timeout must be > 0");
    }
    if config.runtime.rule_exec_timeout.as_millis() == 0 {
        anyhow::bail!("runtime.rule_exec_timeout must be > 0");
    }

    if config.alert.sinks.is_empty() {
        anyhow::bail!("alert.sinks must contain at least one destination");
    }
    for sink in &config.alert.sinks {
        let scheme = sink
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| anyhow::anyhow!("alert sink {sink:?} is missing a scheme"))?;
        if !KNOWN_SINK_SCHEMES.contains(&scheme) {
            anyhow::bail!(
                "alert sink {sink:?} has unknown scheme {scheme:?} (expected one of {KNOWN_SINK_SCHEMES:?})"
            );
        }
    }
    if config.alert.retry.max_attempts == 0 {
        anyhow::bail!("alert.retry.max_attempts must be > 0");
    }
    if config.alert.retry.factor == 0 {
        anyhow::bail!("alert.retry.factor must be > 0");
    }

    Ok(())
}
