pub mod env;
pub mod loader;
pub mod schema;

pub use env::{apply_env_overrides, load_env_file};
pub use loader::{load_config, load_config_from_str, load_config_from_str_with_env, validate_config};
pub use schema::{
    AzureVisionConfig, BackendKind, BackoffConfig, Config, ConversionConfig, CustomApiConfig,
    GoogleVisionConfig, LogFormat, LoggingConfig, NotificationConfig, ProcessingConfig,
    RecognitionConfig, SmtpConfig, SmtpSecurity, WatchConfig, IN_MEMORY_STATE,
};
