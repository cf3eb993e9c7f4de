//! Configuration loading.
//!
//! Sources, lowest priority first: built-in defaults, an optional
//! `config/default.{toml,yaml,json}` file, then `LIVELOG__SECTION__KEY`
//! environment variables.

mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, EmitterSettings, GatewaySettings, LogSettings, PresenceSettings,
    ServerSettings, Settings,
};

pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("LIVELOG")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = partial.merge(Settings::default());
    settings.validate()?;
    Ok(settings)
}
