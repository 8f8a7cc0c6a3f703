//! ISO-9660 image joint.
//!
//! Only the Primary Volume Descriptor tree is read (no Joliet, no Rock
//! Ridge). Directory extents are parsed lazily the first time a directory is
//! descended into and then kept for the lifetime of the joint, which is why
//! ISO joints are worth pooling at all.

use crate::error::{ErrorKind, Result};
use crate::joint::{Joint, JointContext, JointState, needs_size, seek_target};
use crate::models::{FileInfo, base_name};
use async_trait::async_trait;
use encoding_rs::Encoding;
use std::collections::HashMap;
use std::io::SeekFrom;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub(crate) const SECTOR_SIZE: u64 = 2048;
const FIRST_DESCRIPTOR: u64 = 16;
/// Upper bound on volume descriptors to look through before giving up.
const MAX_DESCRIPTORS: u64 = 64;
const DESCRIPTOR_PRIMARY: u8 = 1;
const DESCRIPTOR_TERMINATOR: u8 = 255;
const MAGIC: &[u8; 5] = b"CD001";
const FLAG_DIRECTORY: u8 = 0x02;

#[derive(Debug, Clone)]
struct IsoEntry {
    name: String,
    extent: u64,
    size: u64,
    is_dir: bool,
    modified: Option<OffsetDateTime>,
}
impl IsoEntry {
    /// Parse a directory record. Returns `None` for truncated records.
    fn parse(record: &[u8], charset: &'static Encoding) -> Option<Self> {
        let len = usize::from(*record.first()?);
        let name_len = usize::from(*record.get(32)?);
        if len < 33 + name_len || record.len() < len {
            return None;
        }
        let extent = u32::from_le_bytes(record[2..6].try_into().ok()?);
        let size = u32::from_le_bytes(record[10..14].try_into().ok()?);
        let is_dir = record[25] & FLAG_DIRECTORY != 0;
        let mut raw = &record[33..33 + name_len];
        if !is_dir {
            if let Some(semicolon) = raw.iter().rposition(|b| *b == b';') {
                raw = &raw[..semicolon];
            }
            if let Some(stripped) = raw.strip_suffix(b".") {
                raw = stripped;
            }
        }
        let (name, _) = charset.decode_without_bom_handling(raw);
        Some(Self {
            name: name.into_owned(),
            extent: u64::from(extent),
            size: u64::from(size),
            is_dir,
            modified: parse_recording_date(&record[18..25]),
        })
    }

    fn info(&self, name: &str) -> FileInfo {
        if self.is_dir {
            FileInfo::dir(name, self.modified)
        } else {
            FileInfo::file(name, self.size, self.modified)
        }
    }
}

/// Seven-byte directory record timestamp: years since 1900, month, day,
/// hour, minute, second, and GMT offset in 15 minute steps.
fn parse_recording_date(raw: &[u8]) -> Option<OffsetDateTime> {
    let [year, month, day, hour, minute, second, offset] = raw.try_into().ok()?;
    let date = Date::from_calendar_date(1900 + i32::from(year), Month::try_from(month).ok()?, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    let offset = UtcOffset::from_whole_seconds(i32::from(offset as i8) * 15 * 60).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_offset(offset))
}

struct Section {
    path: String,
    start: u64,
    size: u64,
    pos: u64,
}

/// Joint over a local ISO-9660 image.
pub struct IsoJoint {
    key: String,
    file: Option<File>,
    block_size: u64,
    charset: &'static Encoding,
    root: IsoEntry,
    /// Children of every directory descended so far, by inner path.
    dirs: HashMap<String, Vec<IsoEntry>>,
    state: JointState,
    open: Option<Section>,
}
impl IsoJoint {
    /// Open the image at `key` and read its primary volume descriptor.
    pub async fn make(key: &str, ctx: &JointContext) -> Result<Self> {
        let mut file = File::open(key).await.map_err(|e| ErrorKind::from_io(e, key))?;
        let mut sector = vec![0u8; SECTOR_SIZE as usize];
        let mut primary = None;
        for index in FIRST_DESCRIPTOR..FIRST_DESCRIPTOR + MAX_DESCRIPTORS {
            file.seek(SeekFrom::Start(index * SECTOR_SIZE)).await.map_err(ErrorKind::Io)?;
            if file.read_exact(&mut sector).await.is_err() || &sector[1..6] != MAGIC {
                exn::bail!(ErrorKind::NotIso(key.to_string()));
            }
            match sector[0] {
                DESCRIPTOR_PRIMARY => {
                    primary = Some(sector.clone());
                    break;
                },
                DESCRIPTOR_TERMINATOR => break,
                _ => continue,
            }
        }
        let Some(primary) = primary else {
            exn::bail!(ErrorKind::NotIso(key.to_string()));
        };
        let block_size = u64::from(u16::from_le_bytes([primary[128], primary[129]]));
        let root = IsoEntry::parse(&primary[156..190], ctx.iso_charset);
        let (Some(root), true) = (root, block_size > 0) else {
            exn::bail!(ErrorKind::NotIso(key.to_string()));
        };
        tracing::debug!(key, block_size, "opened ISO image");
        Ok(Self {
            key: key.to_string(),
            file: Some(file),
            block_size,
            charset: ctx.iso_charset,
            root,
            dirs: HashMap::new(),
            state: JointState::Fresh,
            open: None,
        })
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or_else(|| exn::Exn::from(ErrorKind::NotOpen))
    }

    async fn read_extent(&mut self, extent: u64, size: u64) -> Result<Vec<u8>> {
        let offset = extent * self.block_size;
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset)).await.map_err(ErrorKind::Io)?;
        let mut data = Vec::new();
        file.take(size).read_to_end(&mut data).await.map_err(ErrorKind::Io)?;
        Ok(data)
    }

    /// Parse and cache the children of `entry`, known as `path`.
    async fn load_dir(&mut self, path: &str, entry: &IsoEntry) -> Result<()> {
        if self.dirs.contains_key(path) {
            return Ok(());
        }
        let data = self.read_extent(entry.extent, entry.size).await?;
        let block = usize::try_from(self.block_size).unwrap_or(usize::MAX);
        let mut children = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let len = usize::from(data[offset]);
            if len == 0 {
                // Records never straddle a block; the rest of this one is padding.
                offset = (offset / block + 1) * block;
                continue;
            }
            let record = &data[offset..data.len().min(offset + len)];
            offset += len;
            // Skip the `.` and `..` self/parent records.
            if record.get(32) == Some(&1) && matches!(record.get(33), Some(0 | 1)) {
                continue;
            }
            match IsoEntry::parse(record, self.charset) {
                Some(child) => children.push(child),
                None => tracing::warn!(key = %self.key, dir = path, "skipping malformed ISO directory record"),
            }
        }
        self.dirs.insert(path.to_string(), children);
        Ok(())
    }

    async fn lookup(&mut self, inner: &str) -> Result<IsoEntry> {
        let inner = inner.trim_matches('/');
        let mut entry = self.root.clone();
        let mut dir_path = String::new();
        for name in inner.split('/').filter(|name| !name.is_empty()) {
            if !entry.is_dir {
                exn::bail!(ErrorKind::NotFound(inner.to_string()));
            }
            self.load_dir(&dir_path, &entry).await?;
            entry = self
                .dirs
                .get(&dir_path)
                .and_then(|children| children.iter().find(|child| child.name == name))
                .cloned()
                .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(inner.to_string())))?;
            if !dir_path.is_empty() {
                dir_path.push('/');
            }
            dir_path.push_str(name);
        }
        Ok(entry)
    }

    fn section(&mut self) -> Result<&mut Section> {
        self.open.as_mut().ok_or_else(|| exn::Exn::from(ErrorKind::NotOpen))
    }
}

#[async_trait]
impl Joint for IsoJoint {
    fn key(&self) -> &str {
        &self.key
    }

    fn state(&self) -> JointState {
        self.state
    }

    async fn open(&mut self, inner: &str) -> Result<()> {
        let entry = self.lookup(inner).await?;
        if entry.is_dir {
            exn::bail!(ErrorKind::UnexpectedDir(inner.to_string()));
        }
        self.open = Some(Section {
            path: inner.to_string(),
            start: entry.extent * self.block_size,
            size: entry.size,
            pos: 0,
        });
        self.state = JointState::InUse;
        Ok(())
    }

    async fn close_file(&mut self) -> Result<()> {
        self.open = None;
        self.state = JointState::Idle;
        Ok(())
    }

    async fn info(&mut self, inner: &str) -> Result<FileInfo> {
        let entry = self.lookup(inner).await?;
        let name = match inner.trim_matches('/') {
            "" => base_name(&self.key),
            inner => base_name(inner),
        };
        Ok(entry.info(name))
    }

    async fn read_dir(&mut self, inner: &str) -> Result<Vec<FileInfo>> {
        let entry = self.lookup(inner).await?;
        if !entry.is_dir {
            exn::bail!(ErrorKind::NotFound(inner.to_string()));
        }
        let path = inner.trim_matches('/');
        self.load_dir(path, &entry).await?;
        Ok(self
            .dirs
            .get(path)
            .map(|children| children.iter().map(|child| child.info(&child.name)).collect())
            .unwrap_or_default())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let section = self.section()?;
        if section.pos >= section.size {
            return Ok(0);
        }
        let want = usize::try_from(section.size - section.pos).map_or(buf.len(), |left| left.min(buf.len()));
        let offset = section.start + section.pos;
        let path = section.path.clone();
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset)).await.map_err(ErrorKind::Io)?;
        let n = file.read(&mut buf[..want]).await.map_err(|e| ErrorKind::from_io(e, &path))?;
        self.section()?.pos += n as u64;
        Ok(n)
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let section = self.section()?;
        let target = seek_target(pos, section.pos, if needs_size(pos) { section.size } else { 0 })?;
        section.pos = target;
        Ok(target)
    }

    async fn size(&mut self) -> Result<u64> {
        Ok(self.section()?.size)
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.open = None;
        self.file = None;
        self.dirs.clear();
        self.state = JointState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::IsoImageBuilder;
    use crate::settings::VfsSettings;
    use rstest::rstest;

    const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0fake jpeg payload";

    fn image() -> Vec<u8> {
        IsoImageBuilder::new()
            .file("dir/a.jpg", JPEG)
            .file("dir/deeper/b.txt", b"0123456789")
            .file("readme", b"hello")
            .file("Фото/кот.png", b"png")
            .build()
    }

    async fn joint(bytes: &[u8]) -> (tempfile::TempDir, IsoJoint) {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("disk.iso");
        std::fs::write(&path, bytes).unwrap();
        let ctx = JointContext::new(&VfsSettings::default());
        let joint = IsoJoint::make(path.to_str().unwrap(), &ctx).await.unwrap();
        (temp_dir, joint)
    }

    #[tokio::test]
    async fn test_open_nested_file() {
        let (_dir, mut joint) = joint(&image()).await;
        joint.open("dir/a.jpg").await.unwrap();
        assert!(joint.busy());
        let mut head = [0u8; 2];
        assert_eq!(joint.read(&mut head).await.unwrap(), 2);
        assert_eq!(head, [0xFF, 0xD8]);
        assert_eq!(joint.size().await.unwrap(), JPEG.len() as u64);
        joint.close_file().await.unwrap();
        assert_eq!(joint.state(), JointState::Idle);
    }

    #[tokio::test]
    async fn test_read_is_bounded_by_extent() {
        let (_dir, mut joint) = joint(&image()).await;
        joint.open("readme").await.unwrap();
        let mut buf = vec![0u8; 4096];
        assert_eq!(joint.read(&mut buf).await.unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(joint.read(&mut buf).await.unwrap(), 0);
    }

    #[rstest]
    #[case(0, 4)]
    #[case(3, 5)]
    #[case(9, 1)]
    #[case(10, 3)]
    #[tokio::test]
    async fn test_seek_equivalence(#[case] k: u64, #[case] n: usize) {
        let (_dir, mut joint) = joint(&image()).await;
        joint.open("dir/deeper/b.txt").await.unwrap();
        joint.seek(SeekFrom::Start(k)).await.unwrap();
        let mut seeked = vec![0u8; n];
        let got = joint.read(&mut seeked).await.unwrap();
        joint.close_file().await.unwrap();

        joint.open("dir/deeper/b.txt").await.unwrap();
        let mut skip = vec![0u8; k as usize];
        joint.read(&mut skip).await.unwrap();
        let mut read = vec![0u8; n];
        let got_read = joint.read(&mut read).await.unwrap();
        assert_eq!(got, got_read);
        assert_eq!(seeked[..got], read[..got_read]);
    }

    #[tokio::test]
    async fn test_read_dir_and_info() {
        let (_dir, mut joint) = joint(&image()).await;
        let mut root: Vec<_> = joint.read_dir("").await.unwrap().into_iter().map(|f| (f.name, f.is_dir)).collect();
        root.sort();
        assert_eq!(
            root,
            vec![("dir".to_string(), true), ("readme".to_string(), false), ("Фото".to_string(), true)]
        );
        let info = joint.info("dir/deeper/b.txt").await.unwrap();
        assert_eq!(info.name, "b.txt");
        assert_eq!(info.size, 10);
        assert!(info.modified.is_some());
        let root_info = joint.info("").await.unwrap();
        assert!(root_info.is_dir);
        assert_eq!(root_info.name, "disk.iso");
    }

    #[tokio::test]
    async fn test_windows_1251_names() {
        let (_dir, mut joint) = joint(&image()).await;
        let list = joint.read_dir("Фото").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "кот.png");
        joint.open("Фото/кот.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_errors() {
        let (_dir, mut joint) = joint(&image()).await;
        let err = joint.open("dir").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnexpectedDir(_)));
        let err = joint.open("dir/missing.jpg").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = joint.open("readme/below-a-file").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_not_iso() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("fake.iso");
        std::fs::write(&path, vec![0u8; 40 * 1024]).unwrap();
        let ctx = JointContext::new(&VfsSettings::default());
        let Err(err) = IsoJoint::make(path.to_str().unwrap(), &ctx).await else {
            panic!("zeroes are not an ISO image");
        };
        assert!(matches!(&*err, ErrorKind::NotIso(_)));

        std::fs::write(&path, b"short").unwrap();
        let Err(err) = IsoJoint::make(path.to_str().unwrap(), &ctx).await else {
            panic!("a short file is not an ISO image");
        };
        assert!(matches!(&*err, ErrorKind::NotIso(_)));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let (_dir, mut joint) = joint(&image()).await;
        joint.cleanup().await.unwrap();
        joint.cleanup().await.unwrap();
        assert_eq!(joint.state(), JointState::Closed);
    }

    #[test]
    fn test_recording_date() {
        let date = parse_recording_date(&[124, 1, 2, 3, 4, 5, 4]).unwrap();
        assert_eq!(date.year(), 2024);
        assert_eq!(date.offset().whole_hours(), 1);
        assert!(parse_recording_date(&[124, 13, 2, 3, 4, 5, 0]).is_none());
    }
}
