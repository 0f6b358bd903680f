use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct HttpSettings {
    pub addr: String,
    pub shutdown_timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TelegramSettings {
    /// Empty token disables the bot; the HTTP surface still runs.
    pub token: String,
    pub poll_timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StorageSettings {
    /// "memory" or "sqlite".
    pub backend: String,
    pub database_url: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    pub http: HttpSettings,
    pub telegram: TelegramSettings,
    pub storage: StorageSettings,
}

impl AppSettings {
    /// Layered configuration: baked-in defaults, then `appsettings`, then
    /// `appsettings.local`, then `APP__`-prefixed environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("http.addr", "0.0.0.0:8080")?
            .set_default("http.shutdown_timeout_secs", 5)?
            .set_default("telegram.token", "")?
            .set_default("telegram.poll_timeout_secs", 20)?
            .set_default("storage.backend", "memory")?
            .set_default("storage.database_url", "sqlite:pomni.db")?
            .add_source(File::with_name("appsettings").required(false))
            .add_source(File::with_name("appsettings.local").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
