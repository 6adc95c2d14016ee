//! Relay configuration, read from the environment.
//!
//! | variable          | default   | meaning                                  |
//! |-------------------|-----------|------------------------------------------|
//! | `HOST`            | `0.0.0.0` | listen address for both listeners        |
//! | `PORT`            | `3000`    | WebSocket control-channel port           |
//! | `HTTP_PORT`       | `PORT+1`  | `/peers` and `/sync` port                |
//! | `ALLOWED_ORIGINS` | unset     | comma-separated `Origin` allow-list      |
//! | `ALLOWED_ROOMS`   | unset     | comma-separated servable world ids       |
//! | `PRIVATE_ROOMS`   | unset     | comma-separated registered private codes |
//! | `ROOM_CAPACITY`   | `16`      | members per room instance                |
//! | `LOBBY_ROOM`      | `Menu`    | name of the lobby room                   |
//! | `LOBBY_CAPACITY`  | `16`      | members per lobby instance               |

use std::str::FromStr;

use meshroom_room::RoomConfig;

use crate::RelayError;

/// Everything the relay needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// `None` means `port + 1`.
    pub http_port: Option<u16>,
    /// `None` admits any origin.
    pub allowed_origins: Option<Vec<String>>,
    /// `None` serves any world id.
    pub allowed_rooms: Option<Vec<String>>,
    pub private_rooms: Vec<String>,
    pub rooms: RoomConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            http_port: None,
            allowed_origins: None,
            allowed_rooms: None,
            private_rooms: Vec::new(),
            rooms: RoomConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Reads the process environment over the defaults.
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads variables through `lookup` over the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = parse(&lookup, "PORT")? {
            config.port = port;
        }
        config.http_port = parse(&lookup, "HTTP_PORT")?;
        config.allowed_origins = lookup("ALLOWED_ORIGINS").map(|v| split_list(&v));
        config.allowed_rooms = lookup("ALLOWED_ROOMS").map(|v| split_list(&v));
        config.private_rooms = lookup("PRIVATE_ROOMS")
            .map(|v| split_list(&v))
            .unwrap_or_default();
        if let Some(capacity) = parse(&lookup, "ROOM_CAPACITY")? {
            config.rooms.capacity = capacity;
        }
        if let Some(lobby) = lookup("LOBBY_ROOM") {
            config.rooms.lobby_name = lobby;
        }
        if let Some(capacity) = parse(&lookup, "LOBBY_CAPACITY")? {
            config.rooms.lobby_capacity = capacity;
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the relay cannot run with.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.rooms.capacity == 0 {
            return Err(invalid("ROOM_CAPACITY", "0"));
        }
        if self.rooms.lobby_capacity == 0 {
            return Err(invalid("LOBBY_CAPACITY", "0"));
        }
        if self.rooms.lobby_name.is_empty() || self.rooms.lobby_name.contains('-') {
            return Err(invalid("LOBBY_ROOM", &self.rooms.lobby_name));
        }
        if self.http_port.is_none() && self.port == u16::MAX {
            return Err(invalid("PORT", &self.port.to_string()));
        }
        Ok(())
    }

    /// Address of the WebSocket listener.
    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address of the HTTP listener.
    pub fn http_addr(&self) -> String {
        let port = self.http_port.unwrap_or(self.port.saturating_add(1));
        format!("{}:{}", self.host, port)
    }
}

fn invalid(name: &'static str, value: &str) -> RelayError {
    RelayError::Config {
        name,
        value: value.to_string(),
    }
}

fn parse<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, RelayError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(name, &raw)),
    }
}

/// Splits a comma-separated list, dropping blanks.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(vars: &[(&str, &str)]) -> Result<RelayConfig, RelayError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from(&[]).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.ws_addr(), "0.0.0.0:3000");
        assert_eq!(config.http_addr(), "0.0.0.0:3001");
    }

    #[test]
    fn test_env_overrides() {
        let config = from(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9000"),
            ("HTTP_PORT", "8080"),
            ("ALLOWED_ORIGINS", "https://a.test, https://b.test"),
            ("ALLOWED_ROOMS", "tower,park,"),
            ("PRIVATE_ROOMS", "k3y"),
            ("ROOM_CAPACITY", "4"),
            ("LOBBY_ROOM", "Hub"),
            ("LOBBY_CAPACITY", "32"),
        ])
        .unwrap();

        assert_eq!(config.ws_addr(), "127.0.0.1:9000");
        assert_eq!(config.http_addr(), "127.0.0.1:8080");
        assert_eq!(
            config.allowed_origins,
            Some(vec!["https://a.test".to_string(), "https://b.test".to_string()])
        );
        assert_eq!(
            config.allowed_rooms,
            Some(vec!["tower".to_string(), "park".to_string()])
        );
        assert_eq!(config.private_rooms, vec!["k3y".to_string()]);
        assert_eq!(config.rooms.capacity, 4);
        assert_eq!(config.rooms.lobby_name, "Hub");
        assert_eq!(config.rooms.lobby_capacity, 32);
    }

    #[test]
    fn test_bad_number_names_the_variable() {
        let err = from(&[("ROOM_CAPACITY", "lots")]).unwrap_err();
        assert!(matches!(err, RelayError::Config { name: "ROOM_CAPACITY", .. }));
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(from(&[("LOBBY_CAPACITY", "0")]).is_err());
    }

    #[test]
    fn test_lobby_name_cannot_look_like_a_room_key() {
        assert!(from(&[("LOBBY_ROOM", "Menu-1")]).is_err());
    }
}
