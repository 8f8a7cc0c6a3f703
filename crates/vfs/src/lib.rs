//! Uniform virtual filesystem over local disks, ISO-9660 images and remote
//! FTP, SFTP and WebDAV servers.
//!
//! Every path is a plain string: `ftp://`, `sftp://`, `http(s)://` URLs go to
//! the matching remote back-end, anything else is local. A local path that
//! runs *through* a regular file is served from inside that file as an ISO
//! image, so `/media/disk.iso/photos/a.jpg` just works.
//!
//! Connections ("joints") are pooled per upstream and expire after sitting
//! idle; see [`pool::JointPool`].

pub mod backend;
pub mod error;
mod file;
pub mod joint;
mod models;
pub mod pool;
pub mod route;
mod settings;
mod vfs;

pub use crate::error::{Error, ErrorKind, Result, TransportKind};
pub use crate::file::File;
pub use crate::models::FileInfo;
pub use crate::settings::VfsSettings;
pub use crate::vfs::Vfs;
