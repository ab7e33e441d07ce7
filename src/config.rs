//! Process configuration from environment variables

use std::path::PathBuf;

pub const DEFAULT_ABOUT: &str = "Slot exchange: offer a reserved session you cannot attend, \
or claim one somebody else has freed up.";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub catalog_path: PathBuf,
    pub port: u16,
    pub about: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = var("SLOTX_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.slot-exchange/slots.db"))
            },
            PathBuf::from,
        );

        Self {
            db_path,
            catalog_path: PathBuf::from(
                var("SLOTX_CATALOG").unwrap_or_else(|| "catalog.json".to_string()),
            ),
            port: var("SLOTX_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            about: var("SLOTX_ABOUT")
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ABOUT.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("HOME", "/home/ann")]);
        assert_eq!(config.db_path, PathBuf::from("/home/ann/.slot-exchange/slots.db"));
        assert_eq!(config.catalog_path, PathBuf::from("catalog.json"));
        assert_eq!(config.port, 8000);
        assert_eq!(config.about, DEFAULT_ABOUT);
    }

    #[test]
    fn test_overrides_and_bad_port() {
        let config = config(&[
            ("SLOTX_DB_PATH", "/data/slots.db"),
            ("SLOTX_PORT", "not-a-port"),
            ("SLOTX_ABOUT", "Pool swaps"),
        ]);
        assert_eq!(config.db_path, PathBuf::from("/data/slots.db"));
        assert_eq!(config.port, 8000);
        assert_eq!(config.about, "Pool swaps");
    }
}
