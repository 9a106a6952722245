use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;

pub const CONFIG_FILE: &str = "localstore.toml";
pub const ENV_PREFIX: &str = "LOCALSTORE_";

/// File extension used for database files under `data_dir`.
pub const DATABASE_EXT: &str = "sqlite";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory holding one SQLite file per database.
    pub data_dir: PathBuf,
    pub loglevel: String,
    /// Pool size per open database. 1 keeps every transaction serialised.
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            loglevel: "info".to_string(),
            max_connections: 1,
            busy_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Defaults, then `localstore.toml`, then `LOCALSTORE_*` environment variables.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn database_path(&self, database: &str) -> PathBuf {
        self.data_dir.join(format!("{database}.{DATABASE_EXT}"))
    }
}

pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    Config::load().unwrap_or_else(|e| {
        eprintln!("invalid localstore configuration, using defaults: {e}");
        Config::default()
    })
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LOCALSTORE_DATA_DIR", "/tmp/stores");
            jail.set_env("LOCALSTORE_MAX_CONNECTIONS", "4");
            let cfg = Config::load()?;
            assert_eq!(cfg.data_dir, PathBuf::from("/tmp/stores"));
            assert_eq!(cfg.max_connections, 4);
            assert_eq!(cfg.loglevel, "info");
            Ok(())
        });
    }

    #[test]
    fn toml_file_is_merged_below_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, "loglevel = \"debug\"\nbusy_timeout_secs = 9\n")?;
            jail.set_env("LOCALSTORE_LOGLEVEL", "warn");
            let cfg = Config::load()?;
            assert_eq!(cfg.loglevel, "warn");
            assert_eq!(cfg.busy_timeout_secs, 9);
            Ok(())
        });
    }

    #[test]
    fn database_path_uses_data_dir() {
        let cfg = Config {
            data_dir: PathBuf::from("stores"),
            ..Config::default()
        };
        assert_eq!(cfg.database_path("loja"), PathBuf::from("stores/loja.sqlite"));
    }
}
