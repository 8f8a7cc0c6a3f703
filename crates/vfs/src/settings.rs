use encoding_rs::{Encoding, WINDOWS_1251};
use std::time::Duration;

/// Knobs the VFS needs from the outside world.
#[derive(Debug, Clone, Copy)]
pub struct VfsSettings {
    /// How long an idle joint stays parked in the pool.
    pub disk_cache_expire: Duration,
    /// Deadline for establishing (and each blocking call on) a remote upstream.
    pub dial_timeout: Duration,
    /// Charset ISO-9660 file identifiers are decoded with.
    pub iso_charset: &'static Encoding,
}
impl Default for VfsSettings {
    fn default() -> Self {
        Self {
            disk_cache_expire: Duration::from_secs(15),
            dial_timeout: Duration::from_secs(5),
            iso_charset: WINDOWS_1251,
        }
    }
}
