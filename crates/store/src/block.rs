//! Append-only block storage engine.
//!
//! Bytes are appended to numbered block files (`00000001.blk`, ...) in a
//! single directory. A block is sealed once the next write would push it
//! past the size cap, and a new block with the next integer id is
//! opened. The rollover decision happens *before* the write, so a
//! record is never split across two blocks and an oversized record
//! simply gets a fresh block to itself.
//!
//! Block files carry no header or index. A record is addressed solely by
//! the `(block_id, offset, size)` triple the caller stores elsewhere,
//! which also makes startup recovery trivial: scan the directory for the
//! highest-numbered file and resume appending.
//!
//! Stored bytes pass through a reversible XOR transform keyed from the
//! start of each record. This is corruption-obfuscation so block files
//! do not open as plain images; it is not encryption and there is no key
//! management.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::StoreError;

/// Default cap on a single block file (64 MiB).
pub const DEFAULT_MAX_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// Fixed obfuscation key, cycled over each record.
const XOR_KEY: &[u8] = &[0x5a, 0xc3, 0x3c, 0xa5, 0x96, 0x69, 0xf0, 0x0f];

/// Where a record landed: block id, byte offset, and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLocation {
    pub block_id: u64,
    pub offset: u64,
    pub size: u64,
}

/// The block currently accepting writes.
struct ActiveBlock {
    id: u64,
    file: File,
    size: u64,
}

/// Append-only storage over numbered block files.
///
/// The active block is guarded by its own mutex; sealed blocks are read
/// through a lazily populated handle cache, one lock per block.
pub struct BlockEngine {
    dir: PathBuf,
    max_block_size: u64,
    active: Mutex<ActiveBlock>,
    sealed: RwLock<HashMap<u64, Arc<Mutex<File>>>>,
}

impl BlockEngine {
    /// Open the engine over a storage directory, creating it if needed.
    ///
    /// Resumes appending to the highest-numbered existing block file, or
    /// starts block 1 on a fresh directory.
    pub fn open(dir: impl Into<PathBuf>, max_block_size: u64) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let id = highest_block_id(&dir)?.unwrap_or(1);
        let path = block_path(&dir, id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let size = file.metadata()?.len();

        tracing::debug!(
            dir = %dir.display(),
            block_id = id,
            size,
            "Block engine opened",
        );

        Ok(Self {
            dir,
            max_block_size,
            active: Mutex::new(ActiveBlock { id, file, size }),
            sealed: RwLock::new(HashMap::new()),
        })
    }

    /// Append a record, returning where it was stored.
    pub fn write(&self, bytes: &[u8]) -> io::Result<BlockLocation> {
        let mut active = self.active.lock().expect("block lock poisoned");

        // Roll over before an overflowing write; an empty block accepts
        // any record, however large.
        if active.size > 0 && active.size + bytes.len() as u64 > self.max_block_size {
            self.seal_and_advance(&mut active)?;
        }

        let mut obfuscated = bytes.to_vec();
        xor_transform(&mut obfuscated);

        let write_offset = active.size;
        active.file.seek(SeekFrom::Start(write_offset))?;
        active.file.write_all(&obfuscated)?;

        let location = BlockLocation {
            block_id: active.id,
            offset: active.size,
            size: bytes.len() as u64,
        };
        active.size += bytes.len() as u64;
        Ok(location)
    }

    /// Read back a record previously returned by [`write`](Self::write).
    pub fn read(&self, block_id: u64, offset: u64, size: u64) -> Result<Vec<u8>, StoreError> {
        {
            let mut active = self.active.lock().expect("block lock poisoned");
            if active.id == block_id {
                return Ok(read_record(&mut active.file, offset, size)?);
            }
        }

        let handle = self.sealed_handle(block_id)?;
        let mut file = handle.lock().expect("block lock poisoned");
        Ok(read_record(&mut file, offset, size)?)
    }

    /// Storage directory this engine writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ---- private helpers ----

    /// Move the active block into the sealed cache and open the next one.
    fn seal_and_advance(&self, active: &mut ActiveBlock) -> io::Result<()> {
        let next_id = active.id + 1;
        let next_path = block_path(&self.dir, next_id);
        let next_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&next_path)?;

        tracing::info!(
            sealed_block = active.id,
            sealed_size = active.size,
            next_block = next_id,
            "Block sealed, rolling over",
        );

        let sealed = std::mem::replace(
            active,
            ActiveBlock {
                id: next_id,
                file: next_file,
                size: 0,
            },
        );
        self.sealed
            .write()
            .expect("sealed cache lock poisoned")
            .insert(sealed.id, Arc::new(Mutex::new(sealed.file)));
        Ok(())
    }

    /// Handle for a sealed block, opened lazily on first read.
    fn sealed_handle(&self, block_id: u64) -> Result<Arc<Mutex<File>>, StoreError> {
        if let Some(handle) = self
            .sealed
            .read()
            .expect("sealed cache lock poisoned")
            .get(&block_id)
        {
            return Ok(Arc::clone(handle));
        }

        let path = block_path(&self.dir, block_id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::BlockMissing(block_id));
            }
            Err(e) => return Err(e.into()),
        };

        let mut cache = self.sealed.write().expect("sealed cache lock poisoned");
        let handle = cache
            .entry(block_id)
            .or_insert_with(|| Arc::new(Mutex::new(file)));
        Ok(Arc::clone(handle))
    }
}

/// Seek, read, and de-obfuscate one record.
fn read_record(file: &mut File, offset: u64, size: u64) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf)?;
    xor_transform(&mut buf);
    Ok(buf)
}

/// Apply (or reverse, it is its own inverse) the obfuscation transform.
fn xor_transform(buf: &mut [u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= XOR_KEY[i % XOR_KEY.len()];
    }
}

fn block_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id:08}.blk"))
}

/// Highest block id present in the directory, if any.
fn highest_block_id(dir: &Path) -> io::Result<Option<u64>> {
    let mut highest = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("blk") {
            continue;
        }
        if let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        {
            highest = Some(highest.map_or(id, |h: u64| h.max(id)));
        }
    }
    Ok(highest)
}
