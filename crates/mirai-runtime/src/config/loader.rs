//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config`: enables `mirai.toml`
//! - `yaml-config`: enables `mirai.yaml` / `mirai.yml`
//!
//! Both can be enabled; if so, both formats are searched and merged.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic merges ([`ConfigLoader::merge`])
//! 3. Profile-specific config file (`mirai.{profile}.toml` / `mirai.{profile}.yaml`)
//! 4. Main config file (`mirai.toml` / `mirai.yaml`)
//! 5. Environment variables (`MIRAI_*`)
//!
//! # Environment Variable Mapping
//!
//! Variables use the `MIRAI_` prefix with `__` separating nested keys:
//!
//! - `MIRAI_SESSION__AUTH_KEY=xxx` → `session.auth_key = "xxx"`
//! - `MIRAI_CONNECTION__PORT=8081` → `connection.port = 8081`
//! - `MIRAI_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//!
//! # Example
//!
//! ```rust,ignore
//! use mirai_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new().profile("production").load()?;
//!
//! let config = ConfigLoader::new()
//!     .file("./deploy/mirai.toml")
//!     .without_env()
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::MiraiConfig;
use super::validation::validate_config;

/// Environment variable selecting the profile.
pub const PROFILE_ENV: &str = "MIRAI_PROFILE";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "MIRAI_";

/// Configuration profile, used to pick `mirai.{profile}.*` files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads [`PROFILE_ENV`], defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_ENV)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layered configuration builder.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a directory to search for config files. Without any, the current
    /// directory and the user config directory are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.search_path(cwd)
        } else {
            self
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.search_path(config_dir.join("mirai"))
        } else {
            self
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges `config` over the defaults. Files and the environment still
    /// override it.
    pub fn merge(mut self, config: MiraiConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Builds, extracts and validates the configuration.
    pub fn load(self) -> ConfigResult<MiraiConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: MiraiConfig = figment.extract()?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            host = %config.connection.host,
            port = config.connection.port,
            logging_level = %config.logging.level,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(MiraiConfig::default()));

        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        if let Some(path) = self.config_file.take() {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = Self::merge_config_file(figment, &path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment)
    }

    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => {
                let _ = figment;
                Err(ConfigError::UnsupportedFormat(path.to_path_buf()))
            }
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("mirai"));
        }
        paths
    }

    /// Merges the first directory's files that match `base_names`, profile
    /// file first so the base file wins.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                let profile_path = search_path.join(format!("{stem}.{}.{ext}", self.profile));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    figment = merge_fn(figment, &base_path);
                    return (figment, true);
                }
            }
        }
        (figment, false)
    }

    #[cfg_attr(
        not(any(feature = "toml-config", feature = "yaml-config")),
        allow(unused_mut)
    )]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(figment, &search_paths, &["mirai.toml"], |fig, path| {
                fig.merge(Toml::file(path))
            });
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["mirai.yaml", "mirai.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!(paths = ?search_paths, "No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads the configuration from the default locations.
pub fn load_config() -> ConfigResult<MiraiConfig> {
    ConfigLoader::new().load()
}

/// Loads the configuration from `path`, with environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<MiraiConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogLevel;
    use figment::Jail;

    #[test]
    fn default_config() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.logging.level, LogLevel::Info);
            assert_eq!(config.connection.port, 8080);
            Ok(())
        });
    }

    #[test]
    fn profile_parsing() {
        assert_eq!(Profile::parse("prod"), Profile::Production);
        assert_eq!(Profile::parse("Development"), Profile::Development);
        assert_eq!(Profile::parse("staging"), Profile::Custom("staging".into()));
    }

    #[test]
    fn profile_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env(PROFILE_ENV, "production");
            assert_eq!(Profile::from_env(), Profile::Production);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_nested_keys() {
        Jail::expect_with(|jail| {
            jail.set_env("MIRAI_SESSION__AUTH_KEY", "from-env");
            jail.set_env("MIRAI_CONNECTION__PORT", "9090");
            jail.set_env("MIRAI_LOGGING__LEVEL", "debug");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.session.auth_key, "from-env");
            assert_eq!(config.connection.port, 9090);
            assert_eq!(config.logging.level, LogLevel::Debug);
            Ok(())
        });
    }

    #[test]
    fn programmatic_merge_is_below_env() {
        Jail::expect_with(|jail| {
            jail.set_env("MIRAI_CONNECTION__HOST", "env.local");

            let mut base = MiraiConfig::default();
            base.connection.host = "merged.local".into();
            base.session.auth_key = "merged".into();

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .merge(base)
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.connection.host, "env.local");
            assert_eq!(config.session.auth_key, "merged");
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = ConfigLoader::new()
            .file("/definitely/not/here/mirai.toml")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn invalid_values_fail_validation() {
        Jail::expect_with(|jail| {
            jail.set_env("MIRAI_CONNECTION__PORT", "0");
            let result = ConfigLoader::new().search_path(jail.directory()).load();
            assert!(matches!(result, Err(ConfigError::InvalidPort(0))));
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn profile_file_is_overridden_by_base_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "mirai.production.toml",
                r#"
                [connection]
                host = "prod.local"
                port = 7000
                "#,
            )?;
            jail.create_file(
                "mirai.toml",
                r#"
                [connection]
                port = 8081

                [session]
                auth_key = "toml-key"
                bot_id = 123
                "#,
            )?;

            let config = ConfigLoader::new()
                .profile("production")
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.connection.host, "prod.local");
            assert_eq!(config.connection.port, 8081);
            assert_eq!(config.session.auth_key, "toml-key");
            assert_eq!(config.session.bot_id.0, 123);
            Ok(())
        });
    }
}
