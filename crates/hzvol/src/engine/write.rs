//! Write orchestration.
//!
//! Writes run single threaded: each block needs exclusive access to its
//! file region and header slot, so there is nothing to fan out. For every
//! hz level the planner yields the touched blocks; each is read back if it
//! already exists (preserving samples the grid does not cover), mutated
//! from the grid, and written at its recorded offset. New payloads append
//! after the header region or the current end of file, whichever is
//! larger. The active field's header table persists when the pass moves
//! to another backing file and once more at the end.

use super::read::validate_query;
use super::Engine;
use crate::block::header::header_region_bytes;
use crate::block::io::BackingFileWriter;
use crate::block::{block_addresses, first_block_in_file};
use crate::compression::{self, Compression};
use crate::dataset::{Dataset, Layout};
use crate::error::{Result, VolumeError};
use crate::geometry::Grid;
use crate::placement::grid_to_block;

fn validate_write(ds: &Dataset, field: usize, time: i32, hz_level: u32, grid: &Grid) -> Result<()> {
    validate_query(ds, field, time, hz_level, grid)?;
    let w = ds.fields[field].ty.bytes() as u64;
    let needed = grid.extent.num_samples() * w;
    if (grid.data.len() as u64) < needed {
        return Err(VolumeError::InvalidGrid(format!(
            "input buffer holds {} bytes, the extent needs {needed}",
            grid.data.len()
        )));
    }
    Ok(())
}

pub(super) fn write_grid(
    engine: &Engine,
    ds: &Dataset,
    field: usize,
    time: i32,
    grid: &Grid,
) -> Result<()> {
    validate_write(ds, field, time, 0, grid)?;
    let mut writer = BackingFileWriter::new(ds.blocks_per_file);
    for hz_level in (ds.min_hz_level() - 1)..=ds.max_hz_level() {
        write_level(engine, ds, field, time, hz_level, grid, &mut writer)?;
    }
    writer.flush(field)
}

pub(super) fn write_grid_level(
    engine: &Engine,
    ds: &Dataset,
    field: usize,
    time: i32,
    hz_level: u32,
    grid: &Grid,
) -> Result<()> {
    validate_write(ds, field, time, hz_level, grid)?;
    let mut writer = BackingFileWriter::new(ds.blocks_per_file);
    write_level(engine, ds, field, time, hz_level, grid, &mut writer)?;
    writer.flush(field)
}

fn write_level(
    engine: &Engine,
    ds: &Dataset,
    field: usize,
    time: i32,
    hz_level: u32,
    grid: &Grid,
    writer: &mut BackingFileWriter,
) -> Result<()> {
    let w = ds.fields[field].ty.bytes();
    let bits = ds.bit_string();
    let block_size = w << ds.bits_per_block;
    if engine.pool.max_size() != block_size {
        engine.pool.set_sizes(block_size / 2, block_size);
    }
    let header_region = header_region_bytes(ds.fields.len(), ds.blocks_per_file);

    for block in block_addresses(bits, ds.bits_per_block, &grid.extent, hz_level) {
        let (first_block_index, block_in_file) =
            first_block_in_file(block.hz_address, ds.bits_per_block, ds.blocks_per_file);
        writer.ensure_file(ds, field, time, first_block_index)?;

        let mut header = writer.header(block_in_file);
        let mut payload;
        if header.is_present() {
            let stored_compression = header.compression()?;
            payload = writer.read_payload(&header, block.hz_address, &engine.pool)?;
            if stored_compression != Compression::None {
                let inflated =
                    compression::decompress(stored_compression, &payload, block_size)?;
                engine
                    .pool
                    .deallocate(std::mem::replace(&mut payload, inflated));
                // The uncompressed payload no longer fits its old region;
                // append it instead of overwriting a neighbor.
                header.set_offset(writer.file_len()?.max(header_region));
                header.set_bytes(payload.len() as u32);
                header.set_compression(Compression::None);
            }
            if header.layout() != Layout::RowMajor {
                return Err(VolumeError::InvalidFormat);
            }
        } else {
            payload = engine.pool.allocate(block_size);
            header.clear();
            header.set_offset(writer.file_len()?.max(header_region));
            header.set_bytes(block_size as u32);
            header.set_compression(Compression::None);
            header.set_layout(Layout::RowMajor);
        }

        grid_to_block(
            &grid.extent,
            &grid.data,
            w,
            block.from,
            block.to,
            block.stride,
            &mut payload,
        );
        writer.write_payload(&header, block.hz_address, &payload)?;
        writer.set_header(block_in_file, header);
        engine.pool.deallocate(payload);
    }
    Ok(())
}
