//! INI file configuration adapter.
//!
//! Sections read by tradeloop: `[scheduler]`, `[timeouts]`, `[retry]`,
//! `[market]`, `[learning]`, `[storage]`, `[paper]`, `[logging]`.

use crate::domain::error::TradeloopError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

#[derive(Debug)]
pub struct FileConfigAdapter {
    ini: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TradeloopError> {
        let path = path.as_ref();
        let mut ini = Ini::new();
        ini.load(path).map_err(|reason| TradeloopError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        Ok(Self { ini })
    }

    pub fn from_string(content: &str) -> Result<Self, TradeloopError> {
        let mut ini = Ini::new();
        ini.read(content.to_string())
            .map_err(|reason| TradeloopError::ConfigParse {
                file: "<inline>".to_string(),
                reason,
            })?;
        Ok(Self { ini })
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.ini.get(section, key).filter(|v| !v.trim().is_empty())
    }

    // Unparseable numbers fall back to the default; range checks live in config_validation.
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.ini.getint(section, key).ok().flatten().unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.ini.getfloat(section, key).ok().flatten().unwrap_or(default)
    }
}
