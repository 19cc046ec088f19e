use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use failure::{Error, ResultExt};
use serde::{Deserialize, Deserializer};

/// Where the daemon looks for its configuration when no path is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/camwatch/camwatch.toml";

#[derive(Fail, Debug, PartialEq)]
pub enum ConfigError {
    #[fail(display = "screencap_interval must be a positive number of seconds")]
    ZeroScreencapInterval,
    #[fail(display = "mount_poll_attempts must be at least 1")]
    ZeroMountPollAttempts,
    #[fail(display = "{} may not be empty", _0)]
    EmptyPath(&'static str),
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    incoming_dir: PathBuf,
    mount_point_base: PathBuf,
    log_file: PathBuf,
    #[serde(deserialize_with = "comma_list")]
    image_extensions: Vec<String>,
    #[serde(deserialize_with = "comma_list")]
    video_extensions: Vec<String>,
    screencap_interval: u64,
    #[serde(deserialize_with = "comma_list")]
    camera_models: Vec<String>,

    #[serde(default = "default_mount_poll_attempts")]
    mount_poll_attempts: u32,
    #[serde(default = "default_mount_poll_interval_secs")]
    mount_poll_interval_secs: u64,
    #[serde(default = "default_event_poll_interval_ms")]
    event_poll_interval_ms: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    shutdown_grace_secs: u64,
}

fn default_mount_poll_attempts() -> u32 {
    10
}

fn default_mount_poll_interval_secs() -> u64 {
    1
}

fn default_event_poll_interval_ms() -> u64 {
    500
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Split a comma separated list, trimming and lowercasing each entry. Extensions are commonly
/// written as `.jpg`, so a leading dot is dropped as well.
pub fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|item| item.trim().trim_start_matches('.').to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

fn comma_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(split_list(&raw))
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let path = path.as_ref();
        let mut fh = File::open(path)
            .with_context(|_| format!("Couldn't open configuration file {:?}", path))?;
        let mut contents = String::new();
        fh.read_to_string(&mut contents)
            .with_context(|_| format!("Couldn't read configuration file {:?}", path))?;

        Config::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(body: &str) -> Result<Config, Error> {
        let config: Config = match toml::from_str(body) {
            Ok(config) => config,
            Err(e) => return Err(format_err!("Couldn't parse config: {}", e)),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.screencap_interval == 0 {
            return Err(ConfigError::ZeroScreencapInterval);
        }
        if self.mount_poll_attempts == 0 {
            return Err(ConfigError::ZeroMountPollAttempts);
        }
        for (name, path) in &[
            ("incoming_dir", &self.incoming_dir),
            ("mount_point_base", &self.mount_point_base),
            ("log_file", &self.log_file),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::EmptyPath(*name));
            }
        }
        Ok(())
    }

    /// The root of the archive. Date buckets are created directly beneath it.
    pub fn incoming_dir(&self) -> &Path {
        &self.incoming_dir
    }

    /// Only mounts at or below this directory are considered when resolving a device's volume.
    pub fn mount_point_base(&self) -> &Path {
        &self.mount_point_base
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn image_extensions(&self) -> &[String] {
        &self.image_extensions
    }

    pub fn video_extensions(&self) -> &[String] {
        &self.video_extensions
    }

    /// Seconds between extracted video frames.
    pub fn screencap_interval(&self) -> u64 {
        self.screencap_interval
    }

    pub fn camera_models(&self) -> &[String] {
        &self.camera_models
    }

    pub fn mount_poll_attempts(&self) -> u32 {
        self.mount_poll_attempts
    }

    pub fn mount_poll_interval(&self) -> Duration {
        Duration::from_secs(self.mount_poll_interval_secs)
    }

    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Build a config rooted at `incoming_dir` with the default extensions and tuning, for tests
    /// and tools that don't read a configuration file.
    pub fn build<P: AsRef<Path>>(incoming_dir: P) -> Config {
        let incoming_dir = incoming_dir.as_ref().to_path_buf();
        Config {
            log_file: incoming_dir.join("camwatch.log"),
            mount_point_base: PathBuf::from("/"),
            incoming_dir,
            image_extensions: split_list("jpg,jpeg,png,heic,cr2,nef,arw"),
            video_extensions: split_list("mp4,mov,avi,mts"),
            screencap_interval: 30,
            camera_models: split_list("canon,nikon,sony,fujifilm,gopro,olympus,panasonic"),
            mount_poll_attempts: default_mount_poll_attempts(),
            mount_poll_interval_secs: default_mount_poll_interval_secs(),
            event_poll_interval_ms: default_event_poll_interval_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }

    pub fn with_screencap_interval(mut self, secs: u64) -> Config {
        self.screencap_interval = secs;
        self
    }

    pub fn with_camera_models(mut self, models: &str) -> Config {
        self.camera_models = split_list(models);
        self
    }

    pub fn with_mount_polling(mut self, attempts: u32, interval_secs: u64) -> Config {
        self.mount_poll_attempts = attempts;
        self.mount_poll_interval_secs = interval_secs;
        self
    }

    pub fn with_event_poll_interval_ms(mut self, millis: u64) -> Config {
        self.event_poll_interval_ms = millis;
        self
    }
}
