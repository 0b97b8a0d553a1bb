use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, fs::File, path::Path, time::Duration};

fn default_poll_backoff_ms() -> u64 {
    50
}

fn default_render_timeout_secs() -> Option<u64> {
    Some(30)
}

/// Settings for the camera's own FTP upload schedule. The camera pushes
/// images to the host by itself once this is programmed, nothing on our
/// side has to keep running.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Address of the FTP server that receives the images.
    pub ftp: String,
    /// Day of the week the schedule is active on, lower case as the
    /// camera names its resources (e.g. `wednesday`).
    pub day: String,
    /// Start of the window, `HH:MM`.
    pub start: String,
    /// End of the window, `HH:MM`.
    pub stop: String,
    /// Time between two images, `HH:MM`.
    pub interval: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ftp: String::from("192.168.11.18"),
            day: String::from("wednesday"),
            start: String::from("10:00"),
            stop: String::from("22:00"),
            interval: String::from("00:01"),
        }
    }
}

/// Tuning that does not belong on the command line. Every field has a
/// default so an empty file, or no file at all, is valid.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Ax8Config {
    /// Client side timeout for a single http request. Unset means the
    /// request blocks for as long as the transport does.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Pause between two download attempts while the camera renders.
    #[serde(default = "default_poll_backoff_ms")]
    pub poll_backoff_ms: u64,
    /// Give up waiting for a rendered file after this long. Unset waits
    /// forever.
    #[serde(default = "default_render_timeout_secs")]
    pub render_timeout_secs: Option<u64>,
    /// Optional on-camera FTP schedule.
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

impl Default for Ax8Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: None,
            poll_backoff_ms: default_poll_backoff_ms(),
            render_timeout_secs: default_render_timeout_secs(),
            schedule: None,
        }
    }
}

impl Ax8Config {
    /// Read the configuration from a yaml file.
    ///
    /// * `filepath`: path to config file.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self> {
        let file = Path::new(&filepath);
        if !file.is_file() {
            return Err(Error::MissingConfig(file.to_path_buf()));
        }
        let config_file = config::Config::builder()
            .add_source(config::File::new(
                &file.to_string_lossy(),
                config::FileFormat::Yaml,
            ))
            .build()?;
        Ok(config_file.try_deserialize::<Ax8Config>()?)
    }

    /// Write the configuration back to a yaml file.
    ///
    /// * `filepath`: destination, overwritten without asking.
    pub fn to_file<F: AsRef<Path>>(&self, filepath: F) -> Result<()> {
        let file = File::create(filepath)?;
        serde_yaml::to_writer(file, self)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_ms)
    }

    pub fn render_timeout(&self) -> Option<Duration> {
        self.render_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_file_path;
    use serial_test::serial;

    #[test]
    fn test_defaults_match_camera_polling() {
        let config = Ax8Config::default();
        assert_eq!(config.poll_backoff(), Duration::from_millis(50));
        assert_eq!(config.render_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.request_timeout(), None);
        assert!(config.schedule.is_none());
    }

    #[test]
    fn test_read_fixture_config() {
        let config = Ax8Config::from_file(test_file_path!("/config/devices/thermal/ax8.yaml"))
            .expect("Failed to read fixture");
        assert_eq!(config.poll_backoff_ms, 50);
        assert_eq!(config.render_timeout_secs, Some(30));
        assert_eq!(config.schedule, Some(ScheduleConfig::default()));
    }

    #[test]
    #[serial]
    /// Test writing a configuration to a yaml file, and reading back to a
    /// type safe structure.
    fn test_read_write_config_to_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("ax8.yaml");
        let write_config = Ax8Config {
            request_timeout_secs: Some(5),
            poll_backoff_ms: 100,
            render_timeout_secs: Some(10),
            schedule: Some(ScheduleConfig {
                day: String::from("monday"),
                ..Default::default()
            }),
        };

        write_config.to_file(&path).expect("Failed to write yaml");

        let read_config = Ax8Config::from_file(&path).expect("Failed to read config");
        assert_eq!(write_config, read_config, "Failed to read write config");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("partial.yaml");
        std::fs::write(&path, "poll_backoff_ms: 10\n").expect("Failed to write yaml");

        let config = Ax8Config::from_file(&path).expect("Failed to read config");
        assert_eq!(config.poll_backoff(), Duration::from_millis(10));
        assert_eq!(config.render_timeout_secs, Some(30));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = Ax8Config::from_file("./does/not/exist.yaml");
        assert!(matches!(result, Err(Error::MissingConfig(_))));
    }
}
