//! Block model, the block-address planner, and backing-file I/O.
//!
//! A *block* is the contiguous hz range `[k*2^B, (k+1)*2^B)` for
//! `B = bits_per_block`: the unit of storage, compression, and placement.
//! Block 0 is special in that it aggregates every hz level up to `B`.

pub mod header;
pub mod io;

use crate::compression::Compression;
use crate::dataset::Layout;
use crate::geometry::{Vec3, Volume};
use crate::hz;

/// A block staged for reading or writing: its sample grid in domain
/// coordinates, its identity in hz space, and (once read) its payload.
#[derive(Debug, Default)]
pub struct Block {
    /// Smallest coordinates among the block's samples.
    pub from: Vec3,
    /// Largest coordinates among the block's samples.
    pub to: Vec3,
    /// Stride between the block's samples.
    pub stride: Vec3,
    /// Hz address of the block's first sample.
    pub hz_address: u64,
    /// The block's hz level; for block 0 the highest level it aggregates.
    pub hz_level: u32,
    /// Payload byte count recorded in the block's header.
    pub bytes: u32,
    /// Compression of the payload.
    pub compression: Compression,
    /// Sample order of the payload.
    pub layout: Layout,
    /// The payload, empty until read.
    pub data: Vec<u8>,
}

impl Block {
    /// Number of samples on the block's grid.
    pub fn num_samples(&self) -> u64 {
        ((self.to - self.from) / self.stride + 1).product()
    }
}

/// Splits a block's hz address into the first block index of its backing
/// file and the block's position within that file.
pub fn first_block_in_file(
    hz_address: u64,
    bits_per_block: u32,
    blocks_per_file: u32,
) -> (u64, usize) {
    let block_index = hz_address >> bits_per_block;
    let block_in_file = block_index % blocks_per_file as u64;
    (block_index - block_in_file, block_in_file as usize)
}

/// Enumerates the blocks whose footprint intersects `vol` at `hz_level`,
/// sorted by ascending hz address.
///
/// Levels below the minimum collapse onto block 0; the returned block then
/// carries the stride of the next finer level, since its payload fans out
/// into per-level sub-blocks during placement.
pub fn block_addresses(
    bits: &str,
    bits_per_block: u32,
    vol: &Volume,
    hz_level: u32,
) -> Vec<Block> {
    debug_assert!(hz_level as usize <= bits.len());
    debug_assert!(vol.is_valid());

    let min_hz_level = bits_per_block + 1;
    let first_block = hz_level < min_hz_level;
    let (level, start) = if first_block {
        (min_hz_level - 1, Vec3::ZERO)
    } else {
        (hz_level, hz::first_coord(bits, hz_level))
    };

    let stride = hz::inter_block_strides(bits, level, bits_per_block);

    let mut from = start + ((vol.from - start) / stride) * stride;
    let mut to = start + ((vol.to - start) / stride) * stride;
    for axis in 0..3 {
        if vol.from[axis] < start[axis] {
            from[axis] = start[axis];
        }
        if vol.to[axis] < start[axis] {
            to[axis] = start[axis] - stride[axis];
        }
    }
    if !from.le(&to) {
        return Vec::new(); // no block of this level intersects the volume
    }

    let intra = if first_block {
        hz::intra_level_strides(bits, level + 1)
    } else {
        hz::intra_level_strides(bits, level)
    };
    let last = hz::last_coord(bits, level);

    let mut blocks = Vec::new();
    let mut z = from.z;
    while z <= to.z {
        let mut y = from.y;
        while y <= to.y {
            let mut x = from.x;
            while x <= to.x {
                let origin = Vec3::new(x, y, z);
                let hz_address = hz::xyz_to_hz(bits, origin);
                debug_assert_eq!((hz_address >> bits_per_block) << bits_per_block, hz_address);
                let mut block_to = origin + stride - intra;
                if last.le(&block_to) {
                    block_to = last;
                }
                blocks.push(Block {
                    from: origin,
                    to: block_to,
                    stride: intra,
                    hz_address,
                    hz_level: level,
                    ..Block::default()
                });
                x += stride.x;
            }
            y += stride.y;
        }
        z += stride.z;
    }
    blocks.sort_by_key(|b| b.hz_address);
    blocks
}
