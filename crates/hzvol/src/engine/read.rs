//! Read orchestration.
//!
//! The orchestrator validates the query, plans the block list, and walks
//! it in batches of the engine's parallelism: each batch's blocks are read
//! sequentially through the single-slot file cache, then placed by one
//! worker task per block, and the batch joins before the next begins.
//! File I/O therefore stays strictly sequential while placement runs in
//! parallel, and peak payload memory is bounded by one batch.

use super::{Engine, ReadStats};
use crate::block::io::BackingFileCache;
use crate::block::block_addresses;
use crate::compression::{self, Compression};
use crate::dataset::{Dataset, Layout};
use crate::error::{Result, VolumeError};
use crate::geometry::{Grid, Vec3};
use crate::placement::{
    block_to_grid_hz, block_to_grid_row_major, first_block_to_grid, BlockView, GridTarget, Window,
};
use tracing::warn;

/// Checks every query precondition, in the order the errors are
/// specified: descriptor, field, time step, level, extent, buffer.
pub(super) fn validate_query(
    ds: &Dataset,
    field: usize,
    time: i32,
    hz_level: u32,
    grid: &Grid,
) -> Result<()> {
    ds.verify()?;
    if field >= ds.fields.len() {
        return Err(VolumeError::FieldNotFound(field));
    }
    if time < ds.time.begin || time > ds.time.end {
        return Err(VolumeError::TimeStepNotFound(time));
    }
    if hz_level > ds.max_hz_level() {
        return Err(VolumeError::InvalidHzLevel {
            level: hz_level,
            max: ds.max_hz_level(),
        });
    }
    if !grid.extent.is_valid() {
        return Err(VolumeError::InvalidVolume);
    }
    if !grid.extent.is_inside(&ds.bounds) {
        return Err(VolumeError::VolumeTooBig);
    }
    if grid.data.is_empty() {
        return Err(VolumeError::InvalidGrid("empty output buffer".into()));
    }
    Ok(())
}

pub(super) fn read_grid(
    engine: &Engine,
    ds: &Dataset,
    field: usize,
    time: i32,
    hz_level: u32,
    grid: &mut Grid,
) -> Result<ReadStats> {
    validate_query(ds, field, time, hz_level, grid)?;
    let window = match ds.grid(&grid.extent, hz_level) {
        Some(window) => window,
        // No sample of this level falls inside the extent.
        None => return Ok(ReadStats::default()),
    };
    read_grid_region(
        engine, ds, field, time, hz_level, window.0, window.1, window.2, grid,
    )
}

pub(super) fn read_grid_inclusive(
    engine: &Engine,
    ds: &Dataset,
    field: usize,
    time: i32,
    hz_level: u32,
    grid: &mut Grid,
) -> Result<ReadStats> {
    validate_query(ds, field, time, hz_level, grid)?;
    let (from, to, stride) = match ds.grid_inclusive(&grid.extent, hz_level) {
        Some(window) => window,
        None => return Ok(ReadStats::default()),
    };

    // Level 0 collapses onto block 0 and fans out levels 0..bits_per_block;
    // the remaining levels interleave into the same buffer.
    let mut stats = read_grid_region(engine, ds, field, time, 0, from, to, stride, grid)?;
    for level in ds.min_hz_level()..=hz_level {
        stats.absorb(read_grid_region(
            engine, ds, field, time, level, from, to, stride, grid,
        )?);
    }
    Ok(stats)
}

#[allow(clippy::too_many_arguments)]
pub(super) fn read_grid_region(
    engine: &Engine,
    ds: &Dataset,
    field: usize,
    time: i32,
    hz_level: u32,
    out_from: Vec3,
    out_to: Vec3,
    out_stride: Vec3,
    grid: &mut Grid,
) -> Result<ReadStats> {
    validate_query(ds, field, time, hz_level, grid)?;
    if out_stride.x < 1 || out_stride.y < 1 || out_stride.z < 1 {
        return Err(VolumeError::InvalidGrid(format!(
            "output stride {out_stride:?} must be positive"
        )));
    }
    if !out_from.le(&out_to) {
        // An empty output window has nothing to receive.
        return Ok(ReadStats::default());
    }

    let w = ds.fields[field].ty.bytes();
    let out = Window {
        from: out_from,
        to: out_to,
        stride: out_stride,
    };
    let needed = ((out_to - out_from) / out_stride + 1).product() * w as u64;
    if (grid.data.len() as u64) < needed {
        return Err(VolumeError::InvalidGrid(format!(
            "output buffer holds {} bytes, the window needs {needed}",
            grid.data.len()
        )));
    }

    let bits = ds.bit_string();
    let bits_per_block = ds.bits_per_block;
    let first_block_query = hz_level < ds.min_hz_level();
    let extent = grid.extent;

    let mut blocks = block_addresses(bits, bits_per_block, &extent, hz_level);
    if blocks.is_empty() {
        return Ok(ReadStats::default());
    }

    let block_size = w << bits_per_block;
    if engine.pool.max_size() != block_size {
        engine.pool.set_sizes(block_size / 2, block_size);
    }

    let mut cache = BackingFileCache::new(ds.blocks_per_file);
    let mut stats = ReadStats::default();
    let target = GridTarget::new(&mut grid.data);

    for batch in blocks.chunks_mut(engine.parallelism) {
        // Sequential file reads for the whole batch.
        for block in batch.iter_mut() {
            match cache.read_block(ds, field, time, block, &engine.pool) {
                Ok(()) => {}
                Err(e) if !e.is_fatal() => {
                    match e {
                        VolumeError::FileNotFound(_) => stats.missing_files += 1,
                        _ => stats.missing_blocks += 1,
                    }
                    warn!(hz_address = block.hz_address, "skipping absent block: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            }

            if block.compression != Compression::None {
                let inflated = compression::decompress(block.compression, &block.data, block_size)?;
                let packed = std::mem::replace(&mut block.data, inflated);
                engine.pool.deallocate(packed);
                block.bytes = block.data.len() as u32;
                block.compression = Compression::None;
            }

            if block.layout == Layout::RowMajor {
                for axis in 0..3 {
                    if block.stride[axis] % out.stride[axis] != 0 {
                        return Err(VolumeError::InvalidGrid(format!(
                            "output stride {:?} does not divide block stride {:?}",
                            out.stride, block.stride
                        )));
                    }
                }
            }
        }

        // One placement task per block read; the scope joins the batch.
        engine.workers.scope(|scope| {
            for block in batch.iter_mut() {
                if block.data.is_empty() {
                    continue;
                }
                let payload = std::mem::take(&mut block.data);
                let (from, to, stride) = (block.from, block.to, block.stride);
                let (hz_address, level, layout) =
                    (block.hz_address, block.hz_level, block.layout);
                let (target, pool) = (&target, &engine.pool);
                scope.spawn(move |_| {
                    {
                        let view = BlockView {
                            from,
                            to,
                            stride,
                            hz_address,
                            hz_level: level,
                            payload: &payload,
                        };
                        match layout {
                            Layout::RowMajor => {
                                block_to_grid_row_major(&view, w, &out, &extent, target)
                            }
                            Layout::Hz if first_block_query => {
                                first_block_to_grid(
                                    bits,
                                    bits_per_block,
                                    &payload,
                                    w,
                                    &out,
                                    &extent,
                                    target,
                                );
                            }
                            Layout::Hz => {
                                block_to_grid_hz(bits, bits_per_block, &view, w, &out, &extent, target)
                            }
                        }
                    }
                    pool.deallocate(payload);
                });
            }
        });
    }

    Ok(stats)
}
