//! Minimal ISO-9660 image writer for tests.

use super::iso::SECTOR_SIZE;
use encoding_rs::WINDOWS_1251;
use std::collections::{BTreeMap, BTreeSet};

const SECTOR: usize = SECTOR_SIZE as usize;
/// Sector of the first directory extent (after the PVD and terminator).
const FIRST_EXTENT: usize = 18;

#[derive(Default)]
struct Dir {
    subdirs: BTreeSet<String>,
    files: Vec<(String, usize)>,
}

/// Builds a tiny, valid ISO-9660 image in memory.
///
/// Names are stored as Windows-1251, files get the usual `;1` suffix, and
/// every record carries a fixed recording date.
///
/// ```
/// use hearth_vfs::backend::IsoImageBuilder;
///
/// let image = IsoImageBuilder::new().file("dir/a.jpg", b"\xFF\xD8").build();
/// assert_eq!(&image[16 * 2048 + 1..16 * 2048 + 6], b"CD001");
/// ```
#[derive(Default)]
pub struct IsoImageBuilder {
    files: Vec<(String, Vec<u8>)>,
}
impl IsoImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file; intermediate directories are created as needed.
    pub fn file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.trim_matches('/').to_string(), data.into()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut dirs: BTreeMap<String, Dir> = BTreeMap::new();
        dirs.entry(String::new()).or_default();
        for (index, (path, _)) in self.files.iter().enumerate() {
            let (parent, name) = path.rsplit_once('/').unwrap_or(("", path.as_str()));
            let mut current = String::new();
            for part in parent.split('/').filter(|part| !part.is_empty()) {
                let child = if current.is_empty() { part.to_string() } else { format!("{current}/{part}") };
                dirs.entry(current).or_default().subdirs.insert(part.to_string());
                dirs.entry(child.clone()).or_default();
                current = child;
            }
            dirs.entry(current).or_default().files.push((name.to_string(), index));
        }

        // First pass: sizes and extents.
        let mut dir_extent = BTreeMap::new();
        let mut dir_size = BTreeMap::new();
        let mut next = FIRST_EXTENT;
        for (path, dir) in &dirs {
            let mut lens = vec![record_len(1), record_len(1)];
            lens.extend(dir.subdirs.iter().map(|name| record_len(encode(name).len())));
            lens.extend(dir.files.iter().map(|(name, _)| record_len(encode(name).len() + 2)));
            let size = packed_size(&lens).div_ceil(SECTOR).max(1) * SECTOR;
            dir_extent.insert(path.clone(), next);
            dir_size.insert(path.clone(), size);
            next += size / SECTOR;
        }
        let mut file_extent = Vec::with_capacity(self.files.len());
        for (_, data) in &self.files {
            file_extent.push(next);
            next += data.len().div_ceil(SECTOR);
        }

        let mut image = vec![0u8; next * SECTOR];
        let root = record(dir_extent[""], dir_size[""], true, &[0]);
        let pvd = &mut image[16 * SECTOR..17 * SECTOR];
        pvd[0] = 1;
        pvd[1..6].copy_from_slice(b"CD001");
        pvd[6] = 1;
        pvd[80..84].copy_from_slice(&(next as u32).to_le_bytes());
        pvd[84..88].copy_from_slice(&(next as u32).to_be_bytes());
        pvd[128..130].copy_from_slice(&(SECTOR as u16).to_le_bytes());
        pvd[130..132].copy_from_slice(&(SECTOR as u16).to_be_bytes());
        pvd[156..156 + root.len()].copy_from_slice(&root);
        let terminator = &mut image[17 * SECTOR..18 * SECTOR];
        terminator[0] = 255;
        terminator[1..6].copy_from_slice(b"CD001");
        terminator[6] = 1;

        // Second pass: records and file data.
        for (path, dir) in &dirs {
            let parent = path.rsplit_once('/').map_or("", |(parent, _)| parent);
            let parent_key = if path.is_empty() { "" } else { parent };
            let mut records = vec![
                record(dir_extent[path], dir_size[path], true, &[0]),
                record(dir_extent[parent_key], dir_size[parent_key], true, &[1]),
            ];
            for name in &dir.subdirs {
                let child = if path.is_empty() { name.clone() } else { format!("{path}/{name}") };
                records.push(record(dir_extent[&child], dir_size[&child], true, &encode(name)));
            }
            for (name, index) in &dir.files {
                let mut id = encode(name);
                id.extend_from_slice(b";1");
                records.push(record(file_extent[*index], self.files[*index].1.len(), false, &id));
            }
            let mut offset = dir_extent[path] * SECTOR;
            for rec in records {
                if offset % SECTOR + rec.len() > SECTOR {
                    offset = offset.div_ceil(SECTOR) * SECTOR;
                }
                image[offset..offset + rec.len()].copy_from_slice(&rec);
                offset += rec.len();
            }
        }
        for ((_, data), extent) in self.files.iter().zip(file_extent) {
            let start = extent * SECTOR;
            image[start..start + data.len()].copy_from_slice(data);
        }
        image
    }
}

fn encode(name: &str) -> Vec<u8> {
    WINDOWS_1251.encode(name).0.into_owned()
}

fn record_len(name_len: usize) -> usize {
    let len = 33 + name_len;
    len + len % 2
}

fn packed_size(lens: &[usize]) -> usize {
    lens.iter().fold(0, |size, len| {
        let size = if size % SECTOR + len > SECTOR { size.div_ceil(SECTOR) * SECTOR } else { size };
        size + len
    })
}

fn record(extent: usize, size: usize, is_dir: bool, id: &[u8]) -> Vec<u8> {
    let mut rec = vec![0u8; record_len(id.len())];
    rec[0] = rec.len() as u8;
    rec[2..6].copy_from_slice(&(extent as u32).to_le_bytes());
    rec[6..10].copy_from_slice(&(extent as u32).to_be_bytes());
    rec[10..14].copy_from_slice(&(size as u32).to_le_bytes());
    rec[14..18].copy_from_slice(&(size as u32).to_be_bytes());
    rec[18..25].copy_from_slice(&[124, 1, 2, 3, 4, 5, 0]);
    rec[25] = if is_dir { 0x02 } else { 0 };
    rec[28..30].copy_from_slice(&1u16.to_le_bytes());
    rec[32] = id.len() as u8;
    rec[33..33 + id.len()].copy_from_slice(id);
    rec
}
