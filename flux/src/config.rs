use crate::error::StartupError;
use serde_derive::Deserialize;
use std::path::Path;

/// Default cap the host event loop imposes on a single frame's ciphertext
/// length. The protocol core does not validate `L` against any bound
/// (see the framing codec contract); this is purely a host-side guard
/// against unbounded buffering from a misbehaving or malicious peer.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Shared secret the AES-128-CFB key and IV are derived from. Required.
    pub password: String,

    /// Address the remote endpoint listens on for inbound client connections.
    pub listen_addr: String,

    /// Upper bound on a single frame's ciphertext length, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u32,
}

fn default_max_frame_size() -> u32 {
    DEFAULT_MAX_FRAME_SIZE
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, StartupError> {
        let config: Config = serdeconv::from_toml_file(path.as_ref())
            .map_err(|err| StartupError::Config(err.to_string()))?;

        if config.password.is_empty() {
            return Err(StartupError::MissingField("password"));
        }

        Ok(config)
    }
}
