use std::{env, path::PathBuf, time::Duration};

use thiserror::Error;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9050;

/// How long a room without members is kept alive before it is reaped.
pub const DEFAULT_ROOM_GRACE: Duration = Duration::from_secs(300);

/// The configuration of the server, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// The port the http listener binds to
    pub port: u16,
    /// Where local media files are served from
    pub data_dir: PathBuf,
    /// How long an empty room survives before being reaped
    pub room_grace: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{variable} must be a number: {value:?}")]
    NotANumber {
        variable: &'static str,
        value: String,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var("PARLOR_PORT") {
            Ok(value) => value.parse().map_err(|_| ConfigError::NotANumber {
                variable: "PARLOR_PORT",
                value,
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let data_dir = env::var("PARLOR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./media"));

        let room_grace = match env::var("PARLOR_ROOM_GRACE_SECS") {
            Ok(value) => {
                let seconds = value.parse().map_err(|_| ConfigError::NotANumber {
                    variable: "PARLOR_ROOM_GRACE_SECS",
                    value,
                })?;

                Duration::from_secs(seconds)
            }
            Err(_) => DEFAULT_ROOM_GRACE,
        };

        Ok(Self {
            port,
            data_dir,
            room_grace,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("./media"),
            room_grace: DEFAULT_ROOM_GRACE,
        }
    }
}
