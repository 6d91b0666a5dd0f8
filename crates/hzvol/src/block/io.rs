//! Backing-file access: path resolution, the single-slot file cache used
//! by reads, and the read-modify-write file state used by writes.
//!
//! Within one pass the planner hands over blocks in ascending hz order, so
//! consecutive blocks usually live in the same backing file. Both the read
//! and the write side therefore keep exactly one file open and only
//! transition when a block's first-block index changes.

use super::header::{self, BlockHeader, HEADER_BYTES};
use super::{first_block_in_file, Block};
use crate::alloc::{BlockPool, FallbackAllocator, InlineLinearAllocator, Mallocator, ScratchAlloc, ScratchBlock};
use crate::dataset::Dataset;
use crate::error::{Result, VolumeError};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Staging arena for header tables: inline for the common 256-block files,
/// heap beyond that.
type HeaderStaging = FallbackAllocator<InlineLinearAllocator<16384>, Mallocator>;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn hex_group(value: u64, nibbles: u32) -> String {
    let mut out = vec![0u8; nibbles as usize];
    let mut v = value;
    for slot in out.iter_mut().rev() {
        *slot = HEX_DIGITS[(v & 0xf) as usize];
        v >>= 4;
    }
    String::from_utf8(out).expect("hex digits are ascii")
}

/// Resolves the backing file holding `first_block_index`.
///
/// Hex path components consume the index four bits at a time from the
/// least significant end, innermost component first; when the index
/// outgrows the configured groups, the outermost group width repeats. A
/// relative template head is anchored at the dataset's root directory.
pub fn block_file_path(ds: &Dataset, time: i32, first_block_index: u64) -> PathBuf {
    let template = &ds.filename_template;

    // Innermost-first hex components.
    let mut groups = Vec::with_capacity(template.hex_groups.len());
    let mut remaining = first_block_index;
    let mut last_width = 1;
    for &width in &template.hex_groups {
        groups.push(hex_group(remaining, width));
        remaining >>= 4 * width;
        last_width = width.max(1);
    }
    while remaining > 0 {
        groups.push(hex_group(remaining, last_width));
        remaining >>= 4 * last_width;
    }

    let mut path = if template.head.is_absolute() {
        template.head.clone()
    } else {
        ds.root.join(&template.head)
    };
    let time_prefix = ds.time.prefix(time);
    for component in time_prefix.split('/').filter(|c| !c.is_empty()) {
        path.push(component);
    }
    for (i, group) in groups.iter().enumerate().rev() {
        if i == 0 {
            path.push(format!("{}{}", group, template.ext));
        } else {
            path.push(group);
        }
    }
    path
}

/// Decodes one field's block-header table out of `file` into `headers`,
/// staging the raw bytes in `table`. Returns `HeaderNotFound` (and zeroed
/// headers) when the file is shorter than the table.
fn load_header_table(
    file: &mut File,
    field: usize,
    headers: &mut [BlockHeader],
    table: &mut ScratchBlock,
) -> Result<()> {
    let blocks_per_file = headers.len() as u32;
    for h in headers.iter_mut() {
        h.clear();
    }
    file.seek(SeekFrom::Start(header::table_offset(field, blocks_per_file)))?;
    if file.read_exact(table.as_mut_slice()).is_err() {
        return Err(VolumeError::HeaderNotFound);
    }
    let bytes = table.as_slice();
    for (i, h) in headers.iter_mut().enumerate() {
        let chunk: &[u8; HEADER_BYTES] = bytes[i * HEADER_BYTES..(i + 1) * HEADER_BYTES]
            .try_into()
            .expect("staging buffer holds the full table");
        *h = BlockHeader::decode(chunk);
    }
    Ok(())
}

/// Encodes `headers` and writes them back at field `field`'s table offset.
fn store_header_table(
    file: &mut File,
    field: usize,
    headers: &[BlockHeader],
    table: &mut ScratchBlock,
) -> Result<()> {
    let blocks_per_file = headers.len() as u32;
    let bytes = table.as_mut_slice();
    for (i, h) in headers.iter().enumerate() {
        let chunk: &mut [u8; HEADER_BYTES] = (&mut bytes[i * HEADER_BYTES..(i + 1) * HEADER_BYTES])
            .try_into()
            .expect("staging buffer holds the full table");
        h.encode(chunk);
    }
    file.seek(SeekFrom::Start(header::table_offset(field, blocks_per_file)))?;
    file.write_all(table.as_slice())
        .map_err(|_| VolumeError::HeaderWriteFailed)?;
    Ok(())
}

fn new_staging(blocks_per_file: u32) -> (HeaderStaging, ScratchBlock) {
    let mut staging = HeaderStaging::default();
    let table = staging
        .allocate(blocks_per_file as usize * HEADER_BYTES)
        .expect("heap allocation for the header table");
    (staging, table)
}

/// Single-slot cache of the backing file a read pass is currently
/// consuming, plus the decoded header table of the active field.
pub struct BackingFileCache {
    file: Option<File>,
    first_block_index: Option<u64>,
    headers: Vec<BlockHeader>,
    staging: HeaderStaging,
    table: Option<ScratchBlock>,
}

impl BackingFileCache {
    /// Creates a cache for files of `blocks_per_file` blocks.
    pub fn new(blocks_per_file: u32) -> Self {
        let (staging, table) = new_staging(blocks_per_file);
        Self {
            file: None,
            first_block_index: None,
            headers: vec![BlockHeader::default(); blocks_per_file as usize],
            staging,
            table: Some(table),
        }
    }

    /// Reads one block's header and payload. The payload buffer comes from
    /// `pool`; on success it lands in `block.data`.
    pub fn read_block(
        &mut self,
        ds: &Dataset,
        field: usize,
        time: i32,
        block: &mut Block,
        pool: &BlockPool,
    ) -> Result<()> {
        let (first_block_index, block_in_file) =
            first_block_in_file(block.hz_address, ds.bits_per_block, ds.blocks_per_file);

        if self.first_block_index != Some(first_block_index) {
            // Transition: drop the previous file, open the new one, and
            // pull in the field's whole header table.
            self.first_block_index = Some(first_block_index);
            self.file = None;
            let path = block_file_path(ds, time, first_block_index);
            let mut file = match File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "backing file missing");
                    return Err(VolumeError::FileNotFound(path));
                }
                Err(e) => return Err(VolumeError::Io(e)),
            };
            debug!(path = %path.display(), first_block_index, "opened backing file");
            let table = self.table.as_mut().expect("staging buffer is allocated");
            match load_header_table(&mut file, field, &mut self.headers, table) {
                Ok(()) => self.file = Some(file),
                Err(VolumeError::HeaderNotFound) => {
                    // Keep the file current with a zeroed table; its blocks
                    // read as never written.
                    self.file = Some(file);
                    return Err(VolumeError::HeaderNotFound);
                }
                Err(e) => return Err(e),
            }
        }

        let file = match self.file.as_mut() {
            Some(file) => file,
            // The earlier transition to this file failed; report the same
            // missing file without retrying the open.
            None => {
                let path = block_file_path(ds, time, first_block_index);
                return Err(VolumeError::FileNotFound(path));
            }
        };

        let header = &self.headers[block_in_file];
        if !header.is_present() {
            return Err(VolumeError::BlockNotFound(block.hz_address));
        }
        block.bytes = header.bytes();
        block.compression = header.compression()?;
        block.layout = header.layout();

        let mut payload = pool.allocate(block.bytes as usize);
        file.seek(SeekFrom::Start(header.offset()))?;
        if file.read_exact(&mut payload).is_err() {
            pool.deallocate(payload);
            return Err(VolumeError::BlockReadFailed(block.hz_address));
        }
        block.data = payload;
        Ok(())
    }
}

impl Drop for BackingFileCache {
    fn drop(&mut self) {
        if let Some(table) = self.table.take() {
            self.staging.deallocate(table);
        }
    }
}

/// Read-modify-write state for one write pass: the open backing file, the
/// active field's header table, and the pending-flush flag.
pub struct BackingFileWriter {
    file: Option<File>,
    first_block_index: Option<u64>,
    headers: Vec<BlockHeader>,
    staging: HeaderStaging,
    table: Option<ScratchBlock>,
}

impl BackingFileWriter {
    /// Creates writer state for files of `blocks_per_file` blocks.
    pub fn new(blocks_per_file: u32) -> Self {
        let (staging, table) = new_staging(blocks_per_file);
        Self {
            file: None,
            first_block_index: None,
            headers: vec![BlockHeader::default(); blocks_per_file as usize],
            staging,
            table: Some(table),
        }
    }

    /// Makes the backing file of `first_block_index` current, flushing the
    /// previous file's header table on transition and creating the file
    /// (and its directories) when it does not exist yet. A brand-new or
    /// truncated file leaves the header table zeroed, so its blocks read
    /// as never written.
    pub fn ensure_file(
        &mut self,
        ds: &Dataset,
        field: usize,
        time: i32,
        first_block_index: u64,
    ) -> Result<()> {
        if self.first_block_index == Some(first_block_index) {
            return Ok(());
        }
        self.flush(field)?;
        self.first_block_index = Some(first_block_index);

        let path = block_file_path(ds, time, first_block_index);
        let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir)?;
                }
                debug!(path = %path.display(), "creating backing file");
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&path)
                    .map_err(|_| VolumeError::FileNotFound(path.clone()))?
            }
            Err(e) => return Err(VolumeError::Io(e)),
        };

        let table = self.table.as_mut().expect("staging buffer is allocated");
        match load_header_table(&mut file, field, &mut self.headers, table) {
            Ok(()) | Err(VolumeError::HeaderNotFound) => {}
            Err(e) => return Err(e),
        }
        self.file = Some(file);
        Ok(())
    }

    /// The decoded header of a block in the current file.
    pub fn header(&self, block_in_file: usize) -> BlockHeader {
        self.headers[block_in_file]
    }

    /// Replaces a block's header in the in-memory table; it persists on
    /// the next flush.
    pub fn set_header(&mut self, block_in_file: usize, header: BlockHeader) {
        self.headers[block_in_file] = header;
    }

    /// Size of the current file in bytes.
    pub fn file_len(&mut self) -> Result<u64> {
        let file = self.file.as_mut().expect("a file is current");
        Ok(file.metadata()?.len())
    }

    /// Reads a stored block payload at its recorded offset.
    pub fn read_payload(&mut self, header: &BlockHeader, hz_address: u64, pool: &BlockPool) -> Result<Vec<u8>> {
        let file = self.file.as_mut().expect("a file is current");
        let mut payload = pool.allocate(header.bytes() as usize);
        file.seek(SeekFrom::Start(header.offset()))?;
        if file.read_exact(&mut payload).is_err() {
            pool.deallocate(payload);
            return Err(VolumeError::BlockReadFailed(hz_address));
        }
        Ok(payload)
    }

    /// Writes a block payload at its recorded offset.
    pub fn write_payload(&mut self, header: &BlockHeader, hz_address: u64, payload: &[u8]) -> Result<()> {
        let file = self.file.as_mut().expect("a file is current");
        file.seek(SeekFrom::Start(header.offset()))?;
        file.write_all(payload)
            .map_err(|_| VolumeError::BlockWriteFailed(hz_address))?;
        Ok(())
    }

    /// Persists the current file's header table and closes the file. A
    /// no-op when no file is current.
    pub fn flush(&mut self, field: usize) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            let table = self.table.as_mut().expect("staging buffer is allocated");
            store_header_table(&mut file, field, &self.headers, table)?;
            debug!(field, "flushed block header table");
        }
        for h in self.headers.iter_mut() {
            h.clear();
        }
        self.first_block_index = None;
        Ok(())
    }
}

impl Drop for BackingFileWriter {
    fn drop(&mut self) {
        if let Some(table) = self.table.take() {
            self.staging.deallocate(table);
        }
    }
}
