pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    Config, ConfigMetadata, DatabaseConfig, IngestConfig, LimitRange,
    QueryConfig, ServerConfig,
};
pub use validation::{ConfigWarning, ConfigWarnings};
