use serde::Deserialize;

/// Configuration of the headers stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HeadersConfig {
    /// Enables the fork-validator memory overlay: candidate chain heads are
    /// validated against an in-memory staging layer and only flushed once the
    /// consensus layer confirms them.
    pub memory_overlay: bool,
    /// Skip waiting for peers on the first PoW cycle.
    pub no_p2p_discovery: bool,
    /// The maximum number of headers inserted per PoW cycle.
    pub batch_size: usize,
    /// In-memory buffer capacity of the downloaded-headers collector, in
    /// bytes, before it spills to disk.
    pub collector_buffer_size: usize,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            memory_overlay: true,
            no_p2p_discovery: false,
            batch_size: 1024,
            collector_buffer_size: 512 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: HeadersConfig =
            serde_json::from_str(r#"{"memory_overlay": false}"#).unwrap();
        assert!(!config.memory_overlay);
        assert_eq!(config.batch_size, HeadersConfig::default().batch_size);
    }
}
