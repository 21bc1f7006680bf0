use crate::config::DeskConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads desk configuration by layering TOML and environment variables
    /// over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load() -> Result<DeskConfig> {
        let config: DeskConfig = Figment::from(Serialized::defaults(DeskConfig::default()))
            .merge(Toml::file("config/Desk.toml"))
            .merge(Env::prefixed("OPTDESK_").split("__"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_without_files_yields_defaults() {
        let config = ConfigLoader::load().unwrap();
        assert_eq!(config.gateway.port, 7497);
        assert_eq!(config.indicators.min_votes_for_entry, 2);
        assert_eq!(config.pacing.series_per_window, 60);
    }
}
