//! Layered configuration loading
//!
//! Lowest to highest priority: the type's `Default`, a YAML file, then
//! environment variables with a service prefix (`STREAMSRV_REDIS__URL`).

use errors::{StreamError, StreamResult};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Separator for nested keys in environment variables
pub const ENV_NESTING: &str = "__";

/// Build the figment for a config type without extracting it
///
/// A missing file is not an error: defaults and environment still apply.
pub fn figment_for<T>(path: &Path, env_prefix: &str) -> Figment
where
    T: Serialize + Default,
{
    if path.exists() {
        info!("Loading configuration from {}", path.display());
    } else {
        warn!(
            "Config file {} not found, using defaults and environment",
            path.display()
        );
    }

    Figment::from(Serialized::defaults(T::default()))
        .merge(Yaml::file(path))
        .merge(Env::prefixed(env_prefix).split(ENV_NESTING))
}

/// Load a config type from defaults, `path` and `env_prefix`-ed variables
pub fn load_config<T>(path: &Path, env_prefix: &str) -> StreamResult<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    figment_for::<T>(path, env_prefix)
        .extract()
        .map_err(|e| StreamError::Configuration(format!("Failed to load configuration: {}", e)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        nested: Nested,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Nested {
        workers: usize,
        url: String,
    }

    impl Default for Nested {
        fn default() -> Self {
            Self {
                workers: 1,
                url: "redis://default".to_string(),
            }
        }
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let loaded: Sample =
            load_config(Path::new("/nonexistent/sample.yaml"), "SAMPLETEST_").unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    #[serial]
    fn test_file_then_env_priority() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "name: from-file\nnested:\n  workers: 4").unwrap();

        std::env::set_var("SAMPLETEST_NESTED__URL", "redis://env");
        let loaded: Sample = load_config(file.path(), "SAMPLETEST_").unwrap();
        std::env::remove_var("SAMPLETEST_NESTED__URL");

        assert_eq!(loaded.name, "from-file");
        assert_eq!(loaded.nested.workers, 4);
        assert_eq!(loaded.nested.url, "redis://env");
    }

    #[test]
    #[serial]
    fn test_bad_value_is_configuration_error() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "nested:\n  workers: many").unwrap();
        let err = load_config::<Sample>(file.path(), "SAMPLETEST_").unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
    }
}
