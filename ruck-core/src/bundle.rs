//! The bundle container: a mutable random-access archive of named entries
//! with append-style writes and free-list reuse across rebuilds, in the
//! style of the volume/index on-disk formats elsewhere in this pack (see
//! `volume.rs`/`index.rs`) but with a plain entry-table directory instead of
//! a compressed trailer, matching this format's own on-disk layout.

use crate::error::{IoContext, Result, RuckError};
use crate::texture::Texture;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const MAGIC: u32 = 0x4e42_5352; // 'RSBN' little-endian on disk
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 4 + 4 + 8 + 8 + 8 + 8;
const MAX_NAME_LEN: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Texture,
}

impl EntryKind {
    fn byte(self) -> u8 {
        match self {
            EntryKind::File => 0,
            EntryKind::Texture => 1,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(EntryKind::File),
            1 => Ok(EntryKind::Texture),
            other => Err(RuckError::BadFormat(format!("unknown entry kind {other}"))),
        }
    }
}

/// One named record in the bundle directory.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub offset: u64,
    pub used: u64,
    pub capacity: u64,
    pub mtime: u64,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy)]
struct FreeRegion {
    offset: u64,
    length: u64,
}

/// A mutable random-access bundle. Holds the file descriptor, the entry
/// table (in insertion order for `get_files`, plus a name index for O(log n)
/// `find`), and the in-memory free-list.
pub struct Bundle {
    file: File,
    path: PathBuf,
    order: Vec<String>,
    entries: BTreeMap<String, Entry>,
    free: Vec<FreeRegion>,
    file_len: u64,
    dirty: bool,
}

impl Bundle {
    /// Open (or create) a bundle at `path` with an advisory exclusive lock
    /// held for the process lifetime of this handle.
    pub fn open(path: &Path) -> Result<Bundle> {
        let path = path.to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .io_context(path.clone())?;
        file.try_lock_exclusive().map_err(|source| RuckError::Io { path: path.clone(), source })?;

        let file_len = file.metadata().io_context(path.clone())?.len();
        if file_len == 0 {
            let mut bundle = Bundle {
                file,
                path,
                order: Vec::new(),
                entries: BTreeMap::new(),
                free: Vec::new(),
                file_len: HEADER_LEN,
                dirty: true,
            };
            bundle.write_header_and_table()?;
            return Ok(bundle);
        }

        let mut bundle = Bundle {
            file,
            path,
            order: Vec::new(),
            entries: BTreeMap::new(),
            free: Vec::new(),
            file_len,
            dirty: false,
        };
        bundle.load()?;
        Ok(bundle)
    }

    fn load(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0)).io_context(self.path.clone())?;
        let mut header = [0u8; HEADER_LEN as usize];
        self.file.read_exact(&mut header).map_err(|source| RuckError::Io { path: self.path.clone(), source })?;

        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(RuckError::BadFormat(format!("bad bundle magic: {magic:#x}")));
        }
        let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(RuckError::BadFormat(format!("unsupported bundle version: {version}")));
        }
        let entry_table_offset = u64::from_le_bytes(header[8..16].try_into().unwrap());
        let entry_table_length = u64::from_le_bytes(header[16..24].try_into().unwrap());
        let _first_free_offset = u64::from_le_bytes(header[24..32].try_into().unwrap());
        let _file_size_hint = u64::from_le_bytes(header[32..40].try_into().unwrap());

        self.file
            .seek(SeekFrom::Start(entry_table_offset))
            .io_context(self.path.clone())?;
        let mut table = vec![0u8; entry_table_length as usize];
        self.file.read_exact(&mut table).map_err(|source| RuckError::Io { path: self.path.clone(), source })?;

        let mut r: &[u8] = &table;
        let count = read_u32(&mut r)? as usize;
        let mut order = Vec::with_capacity(count);
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let offset = read_u64(&mut r)?;
            let used = read_u64(&mut r)?;
            let capacity = read_u64(&mut r)?;
            let mtime = read_u64(&mut r)?;
            let kind = EntryKind::from_byte(read_u8(&mut r)?)?;
            let name_len = read_u32(&mut r)? as usize;
            let name_bytes = read_bytes(&mut r, name_len)?;
            let name = String::from_utf8(name_bytes)
                .map_err(|_| RuckError::BadFormat("non-utf8 entry name".into()))?;
            order.push(name.clone());
            entries.insert(name.clone(), Entry { name, offset, used, capacity, mtime, kind });
        }

        self.order = order;
        self.free = free_regions(&entries, entry_table_offset);
        self.entries = entries;
        Ok(())
    }

    /// Look up an entry by name.
    pub fn find(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn file_count(&self) -> usize {
        self.order.len()
    }

    /// Entries in insertion order (first add wins the slot; replacing a key
    /// does not move it).
    pub fn get_files(&self) -> Vec<&Entry> {
        self.order.iter().filter_map(|name| self.entries.get(name)).collect()
    }

    pub fn file_size(&self, entry: &Entry) -> u64 {
        entry.used
    }

    pub fn file_mtime(&self, entry: &Entry) -> u64 {
        entry.mtime
    }

    pub fn file_name(&self, entry: &Entry) -> &str {
        &entry.name
    }

    /// Read the raw payload bytes of `entry`.
    pub fn file_read(&mut self, entry: &Entry) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; entry.used as usize];
        self.file.seek(SeekFrom::Start(entry.offset)).io_context(self.path.clone())?;
        self.file.read_exact(&mut buf).map_err(|source| RuckError::Io { path: self.path.clone(), source })?;
        Ok(buf)
    }

    /// Deserialize a texture entry's metadata and composite pages.
    pub fn file_open_texture(&mut self, entry: &Entry) -> Result<Texture> {
        let bytes = self.file_read(entry)?;
        Texture::decode(&bytes)
    }

    /// Insert or replace a file entry with `src`'s bytes and `mtime`.
    pub fn add_file(&mut self, key: &str, src: &Path, mtime: u64) -> Result<()> {
        let bytes = std::fs::read(src).map_err(|source| RuckError::Io { path: src.to_path_buf(), source })?;
        self.put(key, &bytes, mtime, EntryKind::File)
    }

    /// Insert or replace a texture entry with the texture's encoded form.
    pub fn add_texture(&mut self, key: &str, texture: &Texture, mtime: u64) -> Result<()> {
        let bytes = texture.encode();
        self.put(key, &bytes, mtime, EntryKind::Texture)
    }

    fn put(&mut self, key: &str, bytes: &[u8], mtime: u64, kind: EntryKind) -> Result<()> {
        if key.len() > MAX_NAME_LEN {
            return Err(RuckError::KeyTooLong { key: key.to_string(), len: key.len(), max: MAX_NAME_LEN });
        }
        let new_size = bytes.len() as u64;

        let (offset, capacity) = if let Some(existing) = self.entries.get(key) {
            if new_size <= existing.capacity {
                (existing.offset, existing.capacity)
            } else {
                let freed = FreeRegion { offset: existing.offset, length: existing.capacity };
                self.release(freed);
                self.allocate(new_size)
            }
        } else {
            self.allocate(new_size)
        };

        self.file.seek(SeekFrom::Start(offset)).io_context(self.path.clone())?;
        self.file.write_all(bytes).map_err(|source| RuckError::Io { path: self.path.clone(), source })?;

        if !self.entries.contains_key(key) {
            self.order.push(key.to_string());
        }
        self.entries.insert(
            key.to_string(),
            Entry { name: key.to_string(), offset, used: new_size, capacity, mtime, kind },
        );
        self.dirty = true;
        Ok(())
    }

    /// Allocate `size` bytes: reuse the first free region with enough
    /// capacity (earliest offset on tie), otherwise grow the file, doubling
    /// the requested size to amortize future growth.
    fn allocate(&mut self, size: u64) -> (u64, u64) {
        let mut best: Option<usize> = None;
        for (i, region) in self.free.iter().enumerate() {
            if region.length >= size {
                let better = match best {
                    None => true,
                    Some(bi) => region.offset < self.free[bi].offset,
                };
                if better {
                    best = Some(i);
                }
            }
        }

        if let Some(i) = best {
            let region = self.free.remove(i);
            if region.length > size {
                self.free.push(FreeRegion { offset: region.offset + size, length: region.length - size });
                self.free.sort_by_key(|r| r.offset);
            }
            (region.offset, size)
        } else {
            let offset = self.file_len;
            let capacity = (size.max(1)) * 2;
            self.file_len = offset + capacity;
            (offset, capacity)
        }
    }

    fn release(&mut self, region: FreeRegion) {
        self.free.push(region);
        self.free.sort_by_key(|r| r.offset);
        let mut merged: Vec<FreeRegion> = Vec::with_capacity(self.free.len());
        for r in self.free.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.offset + last.length == r.offset {
                    last.length += r.length;
                    continue;
                }
            }
            merged.push(r);
        }
        self.free = merged;
    }

    /// Flush the entry table and header, truncating trailing free space,
    /// and fsync the file.
    pub fn close(mut self) -> Result<()> {
        self.write_header_and_table()
    }

    fn write_header_and_table(&mut self) -> Result<()> {
        if self.free.last().map(|r| r.offset + r.length == self.file_len).unwrap_or(false) {
            let tail = self.free.pop().unwrap();
            self.file_len = tail.offset;
        }

        let mut table = Vec::new();
        table.extend_from_slice(&(self.order.len() as u32).to_le_bytes());
        for name in &self.order {
            let entry = self.entries.get(name).expect("order and entries stay in sync");
            table.extend_from_slice(&entry.offset.to_le_bytes());
            table.extend_from_slice(&entry.used.to_le_bytes());
            table.extend_from_slice(&entry.capacity.to_le_bytes());
            table.extend_from_slice(&entry.mtime.to_le_bytes());
            table.push(entry.kind.byte());
            let name_bytes = entry.name.as_bytes();
            table.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
            table.extend_from_slice(name_bytes);
        }

        let entry_table_offset = self.file_len;
        let entry_table_length = table.len() as u64;

        self.file.seek(SeekFrom::Start(entry_table_offset)).io_context(self.path.clone())?;
        self.file.write_all(&table).map_err(|source| RuckError::Io { path: self.path.clone(), source })?;
        self.file_len = entry_table_offset + entry_table_length;

        let first_free_offset = self.free.first().map(|r| r.offset).unwrap_or(0);

        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(&MAGIC.to_le_bytes());
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&entry_table_offset.to_le_bytes());
        header.extend_from_slice(&entry_table_length.to_le_bytes());
        header.extend_from_slice(&first_free_offset.to_le_bytes());
        header.extend_from_slice(&self.file_len.to_le_bytes());

        self.file.seek(SeekFrom::Start(0)).io_context(self.path.clone())?;
        self.file.write_all(&header).map_err(|source| RuckError::Io { path: self.path.clone(), source })?;
        self.file.set_len(self.file_len).io_context(self.path.clone())?;
        self.file.sync_all().io_context(self.path.clone())?;
        self.dirty = false;
        Ok(())
    }
}

impl Drop for Bundle {
    /// Best-effort flush if the caller didn't call `close()` explicitly,
    /// e.g. because an earlier operation returned an error.
    fn drop(&mut self) {
        if self.dirty {
            let _ = self.write_header_and_table();
        }
    }
}

/// Seconds since the Unix epoch, for stamping a freshly observed mtime.
pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Complement of the live entry spans within `[0, entry_table_offset)`.
fn free_regions(entries: &BTreeMap<String, Entry>, entry_table_offset: u64) -> Vec<FreeRegion> {
    let mut spans: Vec<(u64, u64)> =
        entries.values().map(|e| (e.offset, e.offset + e.capacity)).collect();
    spans.sort_by_key(|s| s.0);

    let mut regions = Vec::new();
    let mut cursor = HEADER_LEN;
    for (start, end) in spans {
        if start > cursor {
            regions.push(FreeRegion { offset: cursor, length: start - cursor });
        }
        cursor = cursor.max(end);
    }
    if cursor < entry_table_offset {
        regions.push(FreeRegion { offset: cursor, length: entry_table_offset - cursor });
    }
    regions
}

fn read_u64(r: &mut &[u8]) -> Result<u64> {
    let bytes = read_bytes(r, 8)?;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u32(r: &mut &[u8]) -> Result<u32> {
    let bytes = read_bytes(r, 4)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u8(r: &mut &[u8]) -> Result<u8> {
    let bytes = read_bytes(r, 1)?;
    Ok(bytes[0])
}

fn read_bytes(r: &mut &[u8], n: usize) -> Result<Vec<u8>> {
    if r.len() < n {
        return Err(RuckError::BadFormat("truncated entry table".into()));
    }
    let (head, tail) = r.split_at(n);
    *r = tail;
    Ok(head.to_vec())
}
