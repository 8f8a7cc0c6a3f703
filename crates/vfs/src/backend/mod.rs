//! Joint implementations, one per back-end.

mod dav;
mod ftp;
mod iso;
#[cfg(any(test, feature = "mock"))]
mod iso_image;
mod local;
mod sftp;

pub(crate) use self::dav::is_collection as is_dav_collection;
pub use self::dav::DavJoint;
pub use self::ftp::FtpJoint;
pub use self::iso::IsoJoint;
#[cfg(any(test, feature = "mock"))]
pub use self::iso_image::IsoImageBuilder;
pub use self::local::LocalJoint;
pub use self::sftp::SftpJoint;

use crate::error::{ErrorKind, Result};
use crate::joint::{BoxJoint, JointContext};
use crate::route::{Backend, Route};
use exn::ResultExt;
use percent_encoding::percent_decode_str;
use url::Url;

/// Login details taken from the userinfo part of a joint key.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Credentials {
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Parse a remote joint key, percent-decoding any credentials it carries.
pub(crate) fn parse_key(key: &str) -> Result<(Url, Credentials)> {
    let url = Url::parse(key).or_raise(|| ErrorKind::InvalidUrl(key.to_string()))?;
    let decode = |raw: &str| percent_decode_str(raw).decode_utf8_lossy().into_owned();
    let credentials = Credentials {
        user: Some(url.username()).filter(|user| !user.is_empty()).map(decode),
        password: url.password().map(decode),
    };
    Ok((url, credentials))
}

/// Build a fresh joint for `route`.
pub(crate) async fn make_joint(route: &Route, ctx: &JointContext) -> Result<BoxJoint> {
    Ok(match route.backend {
        Backend::Local => Box::new(LocalJoint::new()),
        Backend::Iso => Box::new(IsoJoint::make(&route.key, ctx).await?),
        Backend::Ftp => Box::new(FtpJoint::make(&route.key, ctx).await?),
        Backend::Sftp => Box::new(SftpJoint::make(&route.key, ctx).await?),
        Backend::Dav => Box::new(DavJoint::make(&route.key, ctx).await?),
    })
}
