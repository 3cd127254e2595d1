//! Environment variable overrides for configuration.

use super::Config;
use crate::error::ConfigError;
use std::env;

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Names follow the `GATEWAY_<SECTION>__<FIELD>` convention: a
    /// `GATEWAY_` prefix, the config section name, then a double
    /// underscore separating it from the field name.
    pub(super) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = env::var("GATEWAY_SERVER__HOST") {
            self.server.host = val;
        }

        if let Ok(val) = env::var("GATEWAY_SERVER__PORT") {
            self.server.port = parse_env_u16("GATEWAY_SERVER__PORT", &val)?;
        }

        if let Ok(val) = env::var("GATEWAY_SERVER__ENABLE_CORS") {
            self.server.enable_cors = parse_env_bool("GATEWAY_SERVER__ENABLE_CORS", &val)?;
        }

        if let Ok(val) = env::var("GATEWAY_PROMPT__DEFAULT_SYSTEM_PROMPT") {
            self.prompt.default_system_prompt = Some(val);
        }

        if let Ok(val) = env::var("GATEWAY_PROMPT__CONTEXT_FILENAME") {
            self.prompt.context_filename = val;
        }

        if let Ok(val) = env::var("GATEWAY_LOGGING__LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = env::var("GATEWAY_LOGGING__ENABLE_SQLITE_LOGGING") {
            self.logging.enable_sqlite_logging = parse_env_bool("GATEWAY_LOGGING__ENABLE_SQLITE_LOGGING", &val)?;
        }

        if let Ok(val) = env::var("GATEWAY_LOGGING__DATABASE_PATH") {
            self.logging.database_path = val;
        }

        if let Ok(val) = env::var("GATEWAY_RATE_LIMIT__ENABLED") {
            self.rate_limit.enabled = parse_env_bool("GATEWAY_RATE_LIMIT__ENABLED", &val)?;
        }

        if let Ok(val) = env::var("GATEWAY_RATE_LIMIT__MAX_REQUESTS") {
            self.rate_limit.max_requests = parse_env_u32("GATEWAY_RATE_LIMIT__MAX_REQUESTS", &val)?;
        }

        // `BACKENDS_CONFIG` is handled separately by `Config::load`, since it
        // points at a whole file rather than a single scalar value.

        Ok(())
    }
}

pub(super) fn parse_env_u16(var_name: &str, val: &str) -> Result<u16, ConfigError> {
    val.parse().map_err(|_| ConfigError::InvalidValue {
        field: var_name.to_string(),
        message: format!("'{val}' is not a valid u16"),
    })
}

pub(super) fn parse_env_u32(var_name: &str, val: &str) -> Result<u32, ConfigError> {
    val.parse().map_err(|_| ConfigError::InvalidValue {
        field: var_name.to_string(),
        message: format!("'{val}' is not a valid u32"),
    })
}

pub(super) fn parse_env_bool(var_name: &str, val: &str) -> Result<bool, ConfigError> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: var_name.to_string(),
            message: format!("'{other}' is not a valid boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn overrides_port_and_host() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("GATEWAY_SERVER__PORT", "8080");
        env::set_var("GATEWAY_SERVER__HOST", "0.0.0.0");
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        env::remove_var("GATEWAY_SERVER__PORT");
        env::remove_var("GATEWAY_SERVER__HOST");
    }

    #[test]
    fn invalid_port_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("GATEWAY_SERVER__PORT", "not-a-number");
        let mut config = Config::default();
        let result = config.apply_env_overrides();
        assert!(result.is_err());
        env::remove_var("GATEWAY_SERVER__PORT");
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        assert_eq!(parse_env_bool("X", "true").unwrap(), true);
        assert_eq!(parse_env_bool("X", "1").unwrap(), true);
        assert_eq!(parse_env_bool("X", "off").unwrap(), false);
        assert!(parse_env_bool("X", "maybe").is_err());
    }

}
