//! Configuration validation utilities.

use std::collections::HashSet;
use std::net::SocketAddr;

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, ServerConfig, TrellisConfig};
use trellis_framework::RoutingConfig;

/// Validates the entire configuration.
pub fn validate_config(config: &TrellisConfig) -> ConfigResult<()> {
    validate_server_config(&config.server)?;
    validate_routing_config(&config.routing)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_server_config(server: &ServerConfig) -> ConfigResult<()> {
    if server.addr.is_empty() {
        return Err(ConfigError::missing_field("server.addr"));
    }
    if server.addr.parse::<SocketAddr>().is_err() {
        return Err(ConfigError::validation(format!(
            "Invalid server address: {}",
            server.addr
        )));
    }
    if !server.socket_path.starts_with('/') {
        return Err(ConfigError::validation(format!(
            "Socket path must start with '/': {}",
            server.socket_path
        )));
    }
    if server.body_limit == 0 {
        return Err(ConfigError::validation("Body limit must be greater than 0"));
    }
    Ok(())
}

fn validate_routing_config(routing: &RoutingConfig) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for (kind, suffix) in routing.suffixes() {
        if suffix.is_empty() {
            return Err(ConfigError::missing_field(format!(
                "routing.{}_suffix",
                kind.as_str()
            )));
        }
        if !seen.insert(suffix) {
            return Err(ConfigError::validation(format!(
                "Suffix {suffix} is used by more than one module kind"
            )));
        }
    }

    if routing.index_name.is_empty() {
        return Err(ConfigError::missing_field("routing.index_name"));
    }
    if routing.index_name.contains('/') {
        return Err(ConfigError::validation("Index name cannot contain '/'"));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    for target in logging.filters.keys() {
        if target.is_empty() || target.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid log filter target: {target:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_default_is_valid() {
        assert!(validate_config(&TrellisConfig::default()).is_ok());
    }

    #[test]
    fn test_server_rules() {
        let mut config = TrellisConfig::default();
        config.server.addr = "localhost".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));

        let mut config = TrellisConfig::default();
        config.server.socket_path = "socket".into();
        assert!(validate_config(&config).is_err());

        let mut config = TrellisConfig::default();
        config.server.body_limit = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_routing_suffixes_must_differ() {
        let mut config = TrellisConfig::default();
        config.routing.alias_suffix = ".route".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { message }) if message.contains(".route")
        ));

        let mut config = TrellisConfig::default();
        config.routing.channel_suffix.clear();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "routing.channel_suffix"
        ));
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = TrellisConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "logging.file_path"
        ));

        config.logging.file_path = Some("logs/trellis.log".into());
        config.logging.filters.insert("trellis_framework".into(), LogLevel::Debug);
        assert!(validate_config(&config).is_ok());
    }
}
