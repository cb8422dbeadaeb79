pub mod helpers;

use async_trait::async_trait;
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use quiver_error::QuiverError;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// # Description
/// A trait for configuring a struct from a config object.
/// # Notes
/// Components that need to be constructed from the config object should
/// implement this trait.
#[async_trait]
pub trait Configurable<T, E = Box<dyn QuiverError>> {
    async fn try_from_config(config: &T) -> Result<Self, E>
    where
        Self: Sized;
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config error: {0}")]
    ConfigError(#[from] figment::Error),
}

impl QuiverError for ConfigError {
    fn code(&self) -> quiver_error::ErrorCodes {
        quiver_error::ErrorCodes::Internal
    }
}

/// Load a config struct from a YAML file overlaid with `QUIVER_`-prefixed
/// environment variables. Environment values win over file values.
pub fn load_config_from_path<C: DeserializeOwned>(path: &str) -> Result<C, ConfigError> {
    let figment = Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed("QUIVER_").split("__"));
    Ok(figment.extract()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        service_name: String,
        #[serde(default = "TestConfig::default_port")]
        port: u16,
    }

    impl TestConfig {
        fn default_port() -> u16 {
            50051
        }
    }

    #[test]
    fn test_yaml_with_env_overlay() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test_config.yaml",
                r#"
                service_name: "query-coordinator"
                "#,
            )?;
            jail.set_env("QUIVER_PORT", "50052");
            let config: TestConfig = load_config_from_path("test_config.yaml").unwrap();
            assert_eq!(config.service_name, "query-coordinator");
            assert_eq!(config.port, 50052);
            Ok(())
        });
    }
}
