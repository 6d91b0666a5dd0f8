//! The engine: worker pool, block-buffer pool, and the read/write
//! orchestration entry points.

mod read;
mod write;

use crate::alloc::BlockPool;
use crate::dataset::Dataset;
use crate::error::{Result, VolumeError};
use crate::geometry::{Grid, Vec3};
use std::io;

/// Hard ceiling on concurrent placement tasks.
const MAX_PARALLELISM: usize = 1024;

/// Summary of one read pass. Missing backing files and never-written
/// blocks are expected on sparse datasets, so they are reported here
/// instead of failing the read; the corresponding grid regions keep
/// whatever the caller put in the buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Blocks whose header records them as never written, or whose
    /// backing file was shorter than its header table.
    pub missing_blocks: usize,
    /// Blocks whose backing file does not exist.
    pub missing_files: usize,
}

impl ReadStats {
    /// True when every requested block was found and placed.
    pub fn is_complete(&self) -> bool {
        self.missing_blocks == 0 && self.missing_files == 0
    }

    pub(crate) fn absorb(&mut self, other: ReadStats) {
        self.missing_blocks += other.missing_blocks;
        self.missing_files += other.missing_files;
    }
}

/// A volume read/write engine.
///
/// The engine owns the placement worker pool and the block-buffer pool;
/// both are reused across calls. Reads schedule one placement task per
/// block in batches bounded by the engine's parallelism, which also bounds
/// peak payload memory at `parallelism × block size`. Writes run on the
/// calling thread end to end, since a block's read-modify-write needs
/// exclusive access to its file region.
pub struct Engine {
    pool: BlockPool,
    workers: rayon::ThreadPool,
    parallelism: usize,
}

impl Engine {
    /// Creates an engine with twice the hardware parallelism, capped at
    /// 1024 tasks.
    pub fn new() -> Result<Engine> {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(2);
        Self::with_parallelism(threads)
    }

    /// Creates an engine with an explicit task budget.
    pub fn with_parallelism(parallelism: usize) -> Result<Engine> {
        let parallelism = parallelism.clamp(1, MAX_PARALLELISM);
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .thread_name(|i| format!("hzvol-place-{i}"))
            .build()
            .map_err(|e| VolumeError::Io(io::Error::other(e)))?;
        Ok(Engine {
            pool: BlockPool::new(),
            workers,
            parallelism,
        })
    }

    /// The engine's placement-task budget.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Reads the level-`hz_level` samples intersecting `grid.extent` into
    /// the grid, laid out row-major on the level's lattice.
    pub fn read_grid(
        &self,
        ds: &Dataset,
        field: usize,
        time: i32,
        hz_level: u32,
        grid: &mut Grid,
    ) -> Result<ReadStats> {
        read::read_grid(self, ds, field, time, hz_level, grid)
    }

    /// Reads level-`hz_level` samples onto a caller-chosen output lattice
    /// `(out_from, out_to, out_stride)`, allowing several levels to share
    /// one buffer.
    #[allow(clippy::too_many_arguments)]
    pub fn read_grid_region(
        &self,
        ds: &Dataset,
        field: usize,
        time: i32,
        hz_level: u32,
        out_from: Vec3,
        out_to: Vec3,
        out_stride: Vec3,
        grid: &mut Grid,
    ) -> Result<ReadStats> {
        read::read_grid_region(
            self, ds, field, time, hz_level, out_from, out_to, out_stride, grid,
        )
    }

    /// Reads every level up to and including `hz_level` into one coherent
    /// row-major buffer on the inclusive lattice.
    pub fn read_grid_inclusive(
        &self,
        ds: &Dataset,
        field: usize,
        time: i32,
        hz_level: u32,
        grid: &mut Grid,
    ) -> Result<ReadStats> {
        read::read_grid_inclusive(self, ds, field, time, hz_level, grid)
    }

    /// Writes the grid's samples into every hz level of the dataset,
    /// read-modify-writing each touched block and persisting header
    /// tables as files transition.
    pub fn write_grid(&self, ds: &Dataset, field: usize, time: i32, grid: &Grid) -> Result<()> {
        write::write_grid(self, ds, field, time, grid)
    }

    /// Writes the grid's samples into a single hz level.
    pub fn write_grid_level(
        &self,
        ds: &Dataset,
        field: usize,
        time: i32,
        hz_level: u32,
        grid: &Grid,
    ) -> Result<()> {
        write::write_grid_level(self, ds, field, time, hz_level, grid)
    }

    /// Returns every pooled block buffer to the heap.
    pub fn release_buffers(&self) {
        self.pool.deallocate_all();
    }
}
