use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Concurrency limit is at least 1
/// - Subprocess argument template mentions the source placeholder
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.downloads.max_concurrent == 0 {
        return Err(ConfigError::ValidationError(
            "downloads.max_concurrent must be at least 1".to_string(),
        ));
    }

    if !config
        .downloads
        .subprocess
        .args
        .iter()
        .any(|arg| arg.contains("{source}"))
    {
        return Err(ConfigError::ValidationError(
            "downloads.subprocess.args must contain the {source} placeholder".to_string(),
        ));
    }

    Ok(())
}
