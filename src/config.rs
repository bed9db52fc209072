use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::media::{RtcConfig, DEFAULT_STUN_SERVER};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Single STUN resolver handed to every peer connection.
    #[serde(default = "default_stun_server")]
    pub stun_server: String,

    #[serde(default = "default_room_code_length")]
    pub room_code_length: usize,

    #[serde(default = "default_max_presenters_per_room")]
    pub max_presenters_per_room: usize,
}

fn default_stun_server() -> String {
    DEFAULT_STUN_SERVER.to_owned()
}

fn default_room_code_length() -> usize {
    5
}

fn default_max_presenters_per_room() -> usize {
    64
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stun_server: default_stun_server(),
            room_code_length: default_room_code_length(),
            max_presenters_per_room: default_max_presenters_per_room(),
        }
    }
}

impl Config {
    pub fn rtc_config(&self) -> RtcConfig {
        RtcConfig {
            ice_servers: vec![self.stun_server.clone()],
        }
    }
}

pub fn load(path: &Path) -> Result<Config, failure::Error> {
    // create a new file if it does not exist
    if !path.exists() {
        let mut file = File::create(path)?;
        let config = toml::from_str::<Config>("")?;
        file.write_all(toml::to_string(&config)?.as_ref())?;
        return Ok(config);
    }

    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(toml::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = load(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
        assert_eq!(load(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_presenters_per_room = 2\n").unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.max_presenters_per_room, 2);
        assert_eq!(config.room_code_length, 5);
        assert_eq!(config.rtc_config(), RtcConfig::default());
    }
}
