//! Environment-variable configuration.

use crate::merge::MergeConfig;
use crate::redo::{DiscardMode, RedoConfig};

/// Error returned when configuration loading fails.
#[derive(Debug)]
pub enum ConfigError {
    InvalidValue {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, value, reason } => {
                write!(f, "invalid value for environment variable {name}='{value}': {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value,
            reason: "could not be parsed",
        }),
    }
}

/// Load [`MergeConfig`] from the environment.
///
/// # Environment Variables
/// - `WALB_MERGE_SEARCH_LEN`: Optional. Search window in logical blocks.
///   Defaults to 2048.
/// - `WALB_MERGE_CHECK_UUID`: Optional. `"true"` or `"false"`. Defaults to
///   `false`.
///
/// # Errors
/// Returns `ConfigError::InvalidValue` if either variable is set but fails
/// to parse.
pub fn merge_config_from_env() -> Result<MergeConfig, ConfigError> {
    let default = MergeConfig::default();
    Ok(MergeConfig {
        search_len: parse_env("WALB_MERGE_SEARCH_LEN", default.search_len)?,
        check_uuid: parse_env("WALB_MERGE_CHECK_UUID", default.check_uuid)?,
    })
}

/// Load [`RedoConfig`] from the environment.
///
/// # Environment Variables
/// - `WALB_REDO_QUEUE_DEPTH`: Optional. Max in-flight writes. Defaults to
///   32.
/// - `WALB_REDO_MAX_COALESCE_BLOCKS`: Optional. Defaults to 2048.
/// - `WALB_REDO_DISCARD_MODE`: Optional. One of `ignore`, `zerofill`,
///   `issue`. Defaults to `ignore`.
///
/// # Errors
/// Returns `ConfigError::InvalidValue` if any variable is set but invalid.
pub fn redo_config_from_env() -> Result<RedoConfig, ConfigError> {
    let default = RedoConfig::default();
    let queue_depth = parse_env("WALB_REDO_QUEUE_DEPTH", default.queue_depth)?;
    let max_coalesce_blocks = parse_env("WALB_REDO_MAX_COALESCE_BLOCKS", default.max_coalesce_blocks)?;
    let discard_mode = match std::env::var("WALB_REDO_DISCARD_MODE") {
        Err(_) => default.discard_mode,
        Ok(value) => match value.as_str() {
            "ignore" => DiscardMode::Ignore,
            "zerofill" => DiscardMode::ZeroFill,
            "issue" => DiscardMode::Issue,
            _ => {
                return Err(ConfigError::InvalidValue {
                    name: "WALB_REDO_DISCARD_MODE",
                    value,
                    reason: "must be one of: ignore, zerofill, issue",
                });
            }
        },
    };

    Ok(RedoConfig {
        queue_depth,
        max_coalesce_blocks,
        discard_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_used_when_env_is_unset() {
        let merge = merge_config_from_env().unwrap();
        assert_eq!(merge.search_len, MergeConfig::default().search_len);

        let redo = redo_config_from_env().unwrap();
        assert_eq!(redo.queue_depth, RedoConfig::default().queue_depth);
        assert_eq!(redo.discard_mode, RedoConfig::default().discard_mode);
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidValue {
            name: "TEST_VAR",
            value: "bad".to_string(),
            reason: "must be good",
        };
        assert_eq!(err.to_string(), "invalid value for environment variable TEST_VAR='bad': must be good");
    }
}
