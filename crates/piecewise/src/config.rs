//! Persistent configuration, a TOML file in the user's config folder.
use std::path::{Path, PathBuf};

use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{create_dir_all, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, warn};

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Where downloaded files are written.
    pub download_dir: String,
    /// Maximum number of peers connected at the same time.
    pub max_peers: usize,
    /// Port announced to the tracker.
    pub listen_port: u16,
    pub connect_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub message_timeout_secs: u64,
    /// One of trace, debug, info, warn or error.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let download_dir = UserDirs::new()
            .and_then(|dirs| {
                dirs.download_dir().map(|d| d.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| ".".to_owned());

        Self {
            download_dir,
            max_peers: 6,
            listen_port: 6889,
            connect_timeout_secs: 5,
            handshake_timeout_secs: 10,
            message_timeout_secs: 120,
            log_level: "info".to_owned(),
        }
    }
}

impl Config {
    /// Path of the configuration file. The folder is created if it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// If the user has no home folder, or the program cannot create the
    /// config folder.
    pub async fn config_path() -> Result<PathBuf, Error> {
        let dotfile =
            ProjectDirs::from("", "", "Piecewise").ok_or(Error::HomeInvalid)?;
        let config_dir = dotfile.config_dir().to_path_buf();

        if !config_dir.exists() {
            create_dir_all(&config_dir).await.map_err(|_| {
                let dir = config_dir.to_string_lossy().into_owned();
                Error::FolderOpenError(dir)
            })?;
        }

        Ok(config_dir.join("config.toml"))
    }

    /// Load the configuration file at the default path.
    pub async fn load() -> Result<Self, Error> {
        let path = Self::config_path().await?;
        Self::load_from(&path).await
    }

    /// Load the configuration file at `path`. If the file does not exist or
    /// is empty, it is created with the default configuration. Missing keys
    /// take their default value.
    ///
    /// # Errors
    ///
    /// If the file is not a valid configuration. It is left untouched.
    pub async fn load_from(path: &Path) -> Result<Self, Error> {
        let mut content = String::new();

        match File::open(path).await {
            Ok(mut file) => {
                file.read_to_string(&mut content).await?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no configuration file at {path:?}");
            }
            Err(e) => return Err(e.into()),
        }

        if content.trim().is_empty() {
            let config = Config::default();
            config.write_to(path).await?;
            return Ok(config);
        }

        let config = toml::from_str::<Config>(&content).map_err(|e| {
            warn!("invalid configuration file {path:?}: {e}");
            e
        })?;

        Ok(config)
    }

    /// Write the configuration to `path`, replacing its content.
    pub async fn write_to(&self, path: &Path) -> Result<(), Error> {
        let content = toml::to_string(self)?;
        let mut file = File::create(path).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        debug!("wrote configuration to {path:?}");
        Ok(())
    }
}
