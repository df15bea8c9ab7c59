use std::{fs, path::PathBuf};

use fixity_core::ingest::{
    DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_FLUSH_MAX_ROWS, DEFAULT_MAX_PENDING_ROWS,
    DEFAULT_MAX_RECORDS_PER_REQUEST, DEFAULT_SHUTDOWN_DRAIN_MS,
};
use thiserror::Error;

use super::{
    models::{
        Config, ConfigMetadata, DatabaseConfig, IngestConfig, LimitRange,
        QueryConfig, ServerConfig,
    },
    sources::{EnvConfig, FileConfig, FileLimitRange},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] =
    ["fixity.toml", "config/fixity.toml"];

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/fixity.sqlite3";
const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Load `.env`, then the process environment, then the TOML file.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Resolve against an already gathered environment.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) =
            compose_config(file_config, env, config_path, env_file_loaded)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env_config.config_path {
            source.env = Some(from_env.clone());
        }

        if source.is_empty() {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists());
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
    env_file_loaded: bool,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if config_path.is_none() {
        warnings.push_with_hint(
            "No fixity.toml detected; using environment variables and defaults",
            "Set FIXITY_CONFIG or pass --config to point at a configuration file",
        );
    }

    let FileConfig {
        server: file_server,
        database: file_database,
        ingest: file_ingest,
        query: file_query,
    } = file_config.unwrap_or_default();

    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: env.server_port.or(file_server.port).unwrap_or(DEFAULT_PORT),
    };

    let database = DatabaseConfig {
        url: env
            .database_url
            .filter(|value| !value.trim().is_empty())
            .or(file_database.url)
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
        max_connections: env
            .database_max_connections
            .or(file_database.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS),
        busy_timeout_ms: env
            .database_busy_timeout_ms
            .or(file_database.busy_timeout_ms)
            .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
    };

    let ingest = IngestConfig {
        flush_interval_ms: env
            .ingest_flush_interval_ms
            .or(file_ingest.flush_interval_ms)
            .unwrap_or(DEFAULT_FLUSH_INTERVAL_MS),
        flush_max_rows: env
            .ingest_flush_max_rows
            .or(file_ingest.flush_max_rows)
            .unwrap_or(DEFAULT_FLUSH_MAX_ROWS),
        max_pending_rows: env
            .ingest_max_pending_rows
            .or(file_ingest.max_pending_rows)
            .unwrap_or(DEFAULT_MAX_PENDING_ROWS),
        shutdown_drain_ms: env
            .ingest_shutdown_drain_ms
            .or(file_ingest.shutdown_drain_ms)
            .unwrap_or(DEFAULT_SHUTDOWN_DRAIN_MS),
        max_records_per_request: env
            .ingest_max_records_per_request
            .or(file_ingest.max_records_per_request)
            .unwrap_or(DEFAULT_MAX_RECORDS_PER_REQUEST),
    };

    let defaults = QueryConfig::default();
    let query = QueryConfig {
        file: limit_range(&file_query.file, defaults.file),
        machine: limit_range(&file_query.machine, defaults.machine),
        graph: limit_range(&file_query.graph, defaults.graph),
        names: limit_range(&file_query.names, defaults.names),
    };

    let config = Config {
        server,
        database,
        ingest,
        query,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded,
        },
    };

    warnings.extend(validation::apply_guard_rails(&config)?);
    Ok((config, warnings))
}

fn limit_range(file: &FileLimitRange, fallback: LimitRange) -> LimitRange {
    LimitRange {
        default: file.default.unwrap_or(fallback.default),
        max: file.max.unwrap_or(fallback.max),
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn is_empty(&self) -> bool {
        self.explicit.is_none() && self.env.is_none() && self.default.is_none()
    }

    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(
            self,
            ConfigPathProvenance::Explicit | ConfigPathProvenance::Env
        )
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn environment_overrides_file_and_file_overrides_defaults() {
        let file = write_config(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [ingest]
            flush_max_rows = 250
            max_pending_rows = 10000

            [query.graph]
            default = 400
            max = 500
            "#,
        );

        let env = EnvConfig {
            server_port: Some(9100),
            ingest_max_pending_rows: Some(20_000),
            ..EnvConfig::default()
        };

        let ConfigLoad { config, warnings } = ConfigLoader::new()
            .with_config_path(file.path())
            .load_with_env(env, false)
            .expect("config loads");

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.ingest.flush_max_rows, 250);
        assert_eq!(config.ingest.max_pending_rows, 20_000);
        assert_eq!(config.ingest.flush_interval_ms, DEFAULT_FLUSH_INTERVAL_MS);
        assert_eq!(config.database.url, DEFAULT_DATABASE_URL);
        assert_eq!(config.query.graph, LimitRange::new(400, 500));
        assert_eq!(config.query.file, QueryConfig::default().file);
        assert_eq!(config.metadata.config_path.as_deref(), Some(file.path()));
        assert!(warnings.is_empty());
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = ConfigLoader::new()
            .with_config_path("/definitely/not/here/fixity.toml")
            .load_with_env(EnvConfig::default(), false)
            .expect_err("explicit path must exist");
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn zero_flush_batch_is_rejected() {
        let env = EnvConfig {
            config_path: None,
            ingest_flush_max_rows: Some(0),
            ..EnvConfig::default()
        };
        let file = write_config("");
        let err = ConfigLoader::new()
            .with_config_path(file.path())
            .load_with_env(env, false)
            .expect_err("zero batch size");
        assert!(matches!(
            err,
            ConfigLoadError::GuardRail(ConfigGuardRailError::ZeroValue { .. })
        ));
    }

    #[test]
    fn malformed_toml_reports_the_path() {
        let file = write_config("[server\nport = ");
        let err = ConfigLoader::new()
            .with_config_path(file.path())
            .load_with_env(EnvConfig::default(), false)
            .expect_err("parse error");
        match err {
            ConfigLoadError::Parse { path, .. } => assert_eq!(path, file.path()),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
