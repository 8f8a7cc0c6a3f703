//! Layered configuration.
//!
//! Built-in defaults, then a YAML file, then `HEARTH_*` environment
//! variables (`HEARTH_SCAN_THREADS_NUM=0` sets `scan-threads-num`). Durations
//! are (fractional) seconds.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use encoding_rs::Encoding;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use hearth_imaging::TileSettings;
use hearth_vfs::VfsSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "HEARTH_";
const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Seconds an idle joint stays pooled.
    pub disk_cache_expire: f64,
    /// Seconds allowed for dialing a remote upstream, and for each request
    /// made on it afterwards.
    pub dial_timeout: f64,
    pub image_max_mpx: f64,
    /// Thumbnail bounding box, `[width, height]`.
    pub tmb_resolution: [u32; 2],
    /// Prefer the JPEG preview embedded in EXIF over rendering a thumbnail.
    pub use_embedded_tmb: bool,
    pub tile_webp_quality: u8,
    /// Concurrent conversions; `0` means one per CPU.
    pub scan_threads_num: usize,
    /// Seconds to wait for in-flight work after a shutdown request.
    pub shutdown_timeout: f64,
    /// Largest source file, in bytes.
    pub image_max_size: u64,
    /// Encoding label for ISO-9660 file names.
    pub iso_charset: String,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            disk_cache_expire: 15.0,
            dial_timeout: 5.0,
            image_max_mpx: 46.8,
            tmb_resolution: [256, 256],
            use_embedded_tmb: true,
            tile_webp_quality: 60,
            scan_threads_num: 4,
            shutdown_timeout: 15.0,
            image_max_size: 50 * 1024 * 1024,
            iso_charset: "windows-1251".to_string(),
        }
    }
}

fn seconds(value: f64, key: &'static str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).or_raise(|| ErrorKind::Invalid(key))
}

impl Config {
    /// Default location of the config file, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "hearth").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Layered sources: defaults, then `path` (which must exist) or the
    /// platform default file (which may be missing), then the environment.
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let figment = match path {
            Some(path) => figment.merge(Yaml::file_exact(path)),
            None => match Self::default_path() {
                Some(path) => figment.merge(Yaml::file(path)),
                None => figment,
            },
        };
        figment.merge(Env::prefixed(ENV_PREFIX).map(|key| key.as_str().replace('_', "-").into()))
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(&Self::figment(path))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        seconds(self.disk_cache_expire, "disk-cache-expire")?;
        seconds(self.dial_timeout, "dial-timeout")?;
        seconds(self.shutdown_timeout, "shutdown-timeout")?;
        if self.disk_cache_expire <= 0.0 {
            exn::bail!(ErrorKind::Invalid("disk-cache-expire"));
        }
        if self.dial_timeout <= 0.0 {
            exn::bail!(ErrorKind::Invalid("dial-timeout"));
        }
        if !(self.image_max_mpx.is_finite() && self.image_max_mpx > 0.0) {
            exn::bail!(ErrorKind::Invalid("image-max-mpx"));
        }
        if self.tmb_resolution.contains(&0) {
            exn::bail!(ErrorKind::Invalid("tmb-resolution"));
        }
        if !(1..=100).contains(&self.tile_webp_quality) {
            exn::bail!(ErrorKind::Invalid("tile-webp-quality"));
        }
        if self.image_max_size == 0 {
            exn::bail!(ErrorKind::Invalid("image-max-size"));
        }
        self.charset()?;
        Ok(())
    }

    fn charset(&self) -> Result<&'static Encoding> {
        Encoding::for_label(self.iso_charset.as_bytes()).ok_or_raise(|| ErrorKind::Invalid("iso-charset"))
    }

    pub fn shutdown_timeout(&self) -> Result<Duration> {
        seconds(self.shutdown_timeout, "shutdown-timeout")
    }

    pub fn vfs_settings(&self) -> Result<VfsSettings> {
        Ok(VfsSettings {
            disk_cache_expire: seconds(self.disk_cache_expire, "disk-cache-expire")?,
            dial_timeout: seconds(self.dial_timeout, "dial-timeout")?,
            iso_charset: self.charset()?,
        })
    }

    pub fn tile_settings(&self) -> TileSettings {
        TileSettings {
            max_size: self.image_max_size,
            max_mpx: self.image_max_mpx,
            webp_quality: self.tile_webp_quality,
            thumbnail: (self.tmb_resolution[0], self.tmb_resolution[1]),
            use_embedded: self.use_embedded_tmb,
        }
    }
}
