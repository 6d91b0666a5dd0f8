//! Placement kernels: copying samples between block payloads and the
//! caller's output grid.
//!
//! Three kernels cover the four data movements: row-major block to grid,
//! hz-ordered block to grid (the recursive-halving "fast stack" walk), and
//! grid to row-major block for writes. Sample width is a runtime parameter;
//! each copy moves `w` bytes.

use crate::geometry::{Vec3, Volume};
use crate::hz;

/// Destination view of the output grid shared by concurrent placement
/// tasks.
///
/// Tasks write through a raw pointer because each block's footprint is
/// disjoint from every other block's at the same hz level; the planner
/// never produces overlapping destinations within one pass.
pub(crate) struct GridTarget {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: placement tasks write disjoint byte ranges (disjoint block
// footprints), and the orchestrator joins them before the grid is touched
// again.
unsafe impl Send for GridTarget {}
unsafe impl Sync for GridTarget {}

impl GridTarget {
    pub(crate) fn new(data: &mut [u8]) -> Self {
        Self {
            ptr: data.as_mut_ptr(),
            len: data.len(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Copies one sample into the grid, ignoring destinations past the end
    /// of the buffer.
    #[inline]
    fn store(&self, offset: usize, src: &[u8]) {
        if offset + src.len() <= self.len {
            // SAFETY: in-bounds per the check above; disjoint from other
            // tasks' writes per the planner's partition.
            unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(offset), src.len());
            }
        }
    }
}

/// The output grid's lattice: where samples land and at which stride.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window {
    pub from: Vec3,
    pub to: Vec3,
    pub stride: Vec3,
}

impl Window {
    fn dims(&self) -> Vec3 {
        (self.to - self.from) / self.stride + 1
    }
}

/// A block payload plus the geometry needed to place it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockView<'a> {
    pub from: Vec3,
    pub to: Vec3,
    pub stride: Vec3,
    pub hz_address: u64,
    pub hz_level: u32,
    pub payload: &'a [u8],
}

impl BlockView<'_> {
    fn num_samples(&self) -> u64 {
        ((self.to - self.from) / self.stride + 1).product()
    }
}

/// Copies a row-major block into the grid by strided nested loops.
///
/// The caller guarantees that `out.stride` divides the block stride on
/// every axis.
pub(crate) fn block_to_grid_row_major(
    view: &BlockView,
    w: usize,
    out: &Window,
    extent: &Volume,
    dst: &GridTarget,
) {
    let (from, to) = match hz::intersect_grid(extent, view.from, view.to, view.stride) {
        Some(hit) => hit,
        None => return,
    };

    let in_dims = (view.to - view.from) / view.stride + 1;
    let (sx, sxy) = (in_dims.x, in_dims.x * in_dims.y);
    let out_dims = out.dims();
    let (dx, dxy) = (out_dims.x, out_dims.x * out_dims.y);
    let dxyz = out_dims.product() as i64;
    let dd = view.stride / out.stride;

    let mut z = from.z;
    let mut k = (from.z - view.from.z) / view.stride.z;
    let mut zz = (from.z - out.from.z) / out.stride.z;
    while z <= to.z {
        let mut y = from.y;
        let mut j = (from.y - view.from.y) / view.stride.y;
        let mut yy = (from.y - out.from.y) / out.stride.y;
        while y <= to.y {
            let mut x = from.x;
            let mut i = (from.x - view.from.x) / view.stride.x;
            let mut xx = (from.x - out.from.x) / out.stride.x;
            while x <= to.x {
                let ijk = (i + j * sx + k * sxy) as usize;
                let xyz = xx + yy * dx + zz * dxy;
                if xyz >= 0 && xyz < dxyz {
                    if let Some(src) = view.payload.get(ijk * w..ijk * w + w) {
                        dst.store(xyz as usize * w, src);
                    }
                }
                x += view.stride.x;
                i += 1;
                xx += dd.x;
            }
            y += view.stride.y;
            j += 1;
            yy += dd.y;
        }
        z += view.stride.z;
        k += 1;
        zz += dd.z;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Span {
    hz: u64,
    /// Bit-string position of the axis this span divides along next.
    div_pos: usize,
    from: Vec3,
    to: Vec3,
    num: u64,
}

/// Copies an hz-ordered block into the grid with the fast-stack walk:
/// repeatedly halve the block's box along the axis the bit string names,
/// pruning halves that miss the grid's extent, until single samples drop
/// out in hz order.
pub(crate) fn block_to_grid_hz(
    bits: &str,
    bits_per_block: u32,
    view: &BlockView,
    w: usize,
    out: &Window,
    extent: &Volume,
    dst: &GridTarget,
) {
    debug_assert!(view.hz_level as usize <= bits.len());
    let bytes = bits.as_bytes();

    // Deep enough for a 62-bit string plus both halves of every split.
    let mut stack = [Span::default(); 65];
    stack[0] = Span {
        hz: view.hz_address,
        div_pos: hz::dividing_pos(bits_per_block, view.hz_level),
        from: view.from,
        to: view.to,
        num: view.num_samples(),
    };
    let mut len = 1;

    let out_dims = out.dims();
    let (dx, dxy) = (out_dims.x, out_dims.x * out_dims.y);
    let dxyz = out_dims.product() as i64;

    while len > 0 {
        len -= 1;
        let span = stack[len];
        debug_assert_eq!(span.hz, hz::xyz_to_hz(bits, span.from));

        if span.num == 1 {
            debug_assert_eq!(span.from, span.to);
            let coord = (span.from - out.from) / out.stride;
            let xyz = coord.x + coord.y * dx + coord.z * dxy;
            let ijk = (span.hz - view.hz_address) as usize;
            if xyz >= 0 && xyz < dxyz {
                if let Some(src) = view.payload.get(ijk * w..ijk * w + w) {
                    dst.store(xyz as usize * w, src);
                }
            }
            continue;
        }

        debug_assert_eq!(span.num % 2, 0);
        let axis = hz::axis_of(bytes[span.div_pos]);
        let mut first = Span {
            div_pos: span.div_pos + 1,
            num: span.num / 2,
            hz: span.hz,
            from: span.from,
            to: span.to,
        };
        let mut second = Span {
            hz: span.hz + span.num / 2,
            ..first
        };

        let samples = (span.to[axis] - span.from[axis]) / view.stride[axis] + 1;
        debug_assert_eq!(samples % 2, 0);
        let half = samples / 2;
        first.to[axis] = first.from[axis] + (half - 1) * view.stride[axis];
        second.from[axis] = second.to[axis] - (half - 1) * view.stride[axis];

        // Second half below so the first half pops next: the walk stays in
        // ascending hz order.
        if extent.from.le(&second.to) && second.from.le(&extent.to) {
            stack[len] = second;
            len += 1;
        }
        if extent.from.le(&first.to) && first.from.le(&extent.to) {
            stack[len] = first;
            len += 1;
        }
    }
}

/// Places block 0, which carries every hz level up to `bits_per_block`, by
/// fanning out into one virtual sub-block per level. Level k's samples
/// occupy `w * 2^(k-1)` bytes of the payload (level 0 occupies `w`), so
/// the payload offset runs 0, w, 2w, 4w, ...
pub(crate) fn first_block_to_grid(
    bits: &str,
    bits_per_block: u32,
    payload: &[u8],
    w: usize,
    out: &Window,
    extent: &Volume,
    dst: &GridTarget,
) {
    let total = payload.len();
    let mut level = 0u32;
    let mut offset = 0usize;
    let mut bytes = w;
    let mut old_bytes = 0usize;
    let mut hz_address = 0u64;
    let mut old_hz = 1u64;

    while bytes < total && bytes < dst.len() && offset + bytes <= total {
        let view = BlockView {
            from: hz::first_coord(bits, level),
            to: hz::last_coord(bits, level),
            stride: hz::intra_level_strides(bits, level),
            hz_address,
            hz_level: level,
            payload: &payload[offset..offset + bytes],
        };
        block_to_grid_hz(bits, bits_per_block, &view, w, out, extent, dst);

        level += 1;
        offset += bytes;
        bytes += old_bytes;
        old_bytes = bytes;
        hz_address += old_hz;
        old_hz = hz_address;
    }
}

/// Copies the intersecting part of the caller's grid into a row-major
/// block payload. The grid is read at unit stride over its extent.
pub(crate) fn grid_to_block(
    extent: &Volume,
    grid_payload: &[u8],
    w: usize,
    block_from: Vec3,
    block_to: Vec3,
    block_stride: Vec3,
    payload: &mut [u8],
) {
    let (from, to) = match hz::intersect_grid(extent, block_from, block_to, block_stride) {
        Some(hit) => hit,
        None => return,
    };

    let out_dims = (block_to - block_from) / block_stride + 1;
    let (sx, sxy) = (out_dims.x, out_dims.x * out_dims.y);
    let in_dims = extent.dims();
    let (dx, dxy) = (in_dims.x, in_dims.x * in_dims.y);

    let mut z = from.z - extent.from.z;
    let mut k = (from.z - block_from.z) / block_stride.z;
    while z <= to.z - extent.from.z {
        let mut y = from.y - extent.from.y;
        let mut j = (from.y - block_from.y) / block_stride.y;
        while y <= to.y - extent.from.y {
            let mut x = from.x - extent.from.x;
            let mut i = (from.x - block_from.x) / block_stride.x;
            while x <= to.x - extent.from.x {
                let ijk = (i + j * sx + k * sxy) as usize;
                let xyz = (x + y * dx + z * dxy) as usize;
                if let (Some(dst), Some(src)) = (
                    payload.get_mut(ijk * w..ijk * w + w),
                    grid_payload.get(xyz * w..xyz * w + w),
                ) {
                    dst.copy_from_slice(src);
                }
                x += block_stride.x;
                i += 1;
            }
            y += block_stride.y;
            j += 1;
        }
        z += block_stride.z;
        k += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::block_addresses;

    const BITS: &str = "210210";
    const BPB: u32 = 2;
    const W: usize = 4;

    fn cube() -> Volume {
        Volume::new(Vec3::ZERO, Vec3::new(3, 3, 3))
    }

    fn grid_index(out: &Window, coord: Vec3) -> usize {
        let c = (coord - out.from) / out.stride;
        let dims = out.dims();
        (c.x + c.y * dims.x + c.z * dims.x * dims.y) as usize
    }

    #[test]
    fn row_major_block_lands_on_its_footprint() {
        // A block over every odd-x sample of z=0..2, placed into the full
        // cube at unit stride.
        let payload: Vec<u8> = (0u32..8).flat_map(|v| v.to_le_bytes()).collect();
        let view = BlockView {
            from: Vec3::new(1, 0, 0),
            to: Vec3::new(3, 2, 2),
            stride: Vec3::new(2, 2, 2),
            hz_address: 0,
            hz_level: 0,
            payload: &payload,
        };
        let out = Window {
            from: Vec3::ZERO,
            to: Vec3::new(3, 3, 3),
            stride: Vec3::ONE,
        };
        let mut grid = vec![0u8; 64 * W];
        let dst = GridTarget::new(&mut grid);
        block_to_grid_row_major(&view, W, &out, &cube(), &dst);

        for k in 0..2i64 {
            for j in 0..2i64 {
                for i in 0..2i64 {
                    let coord = Vec3::new(1 + 2 * i, 2 * j, 2 * k);
                    let at = grid_index(&out, coord) * W;
                    let got = u32::from_le_bytes(grid[at..at + W].try_into().unwrap());
                    assert_eq!(got as i64, i + j * 2 + k * 4, "{coord:?}");
                }
            }
        }
    }

    #[test]
    fn row_major_respects_extent_clipping() {
        let payload: Vec<u8> = (0u32..8).flat_map(|v| v.to_le_bytes()).collect();
        let view = BlockView {
            from: Vec3::new(1, 0, 0),
            to: Vec3::new(3, 2, 2),
            stride: Vec3::new(2, 2, 2),
            hz_address: 0,
            hz_level: 0,
            payload: &payload,
        };
        // Clip to the x <= 1 half.
        let extent = Volume::new(Vec3::ZERO, Vec3::new(1, 3, 3));
        let out = Window {
            from: Vec3::ZERO,
            to: Vec3::new(1, 3, 3),
            stride: Vec3::ONE,
        };
        let mut grid = vec![0xffu8; 2 * 4 * 4 * W];
        let dst = GridTarget::new(&mut grid);
        block_to_grid_row_major(&view, W, &out, &extent, &dst);

        // Only the x = 1 column of the block is inside.
        for k in 0..2i64 {
            for j in 0..2i64 {
                let at = grid_index(&out, Vec3::new(1, 2 * j, 2 * k)) * W;
                let got = u32::from_le_bytes(grid[at..at + W].try_into().unwrap());
                assert_eq!(got as i64, j * 2 + k * 4);
            }
        }
        // x = 3 samples stayed out.
        assert_eq!(grid[0], 0xff);
    }

    #[test]
    fn hz_walk_matches_the_index_algebra() {
        // For every block of every stored level, an hz-ordered payload
        // with payload[i] = i must land exactly where hz_to_xyz puts
        // sample hz_address + i.
        for level in (BPB + 1)..=BITS.len() as u32 {
            let out = {
                let stride = hz::intra_level_strides(BITS, level);
                Window {
                    from: hz::first_coord(BITS, level),
                    to: hz::last_coord(BITS, level),
                    stride,
                }
            };
            let mut grid = vec![0xffu8; out.dims().product() as usize * W];
            let dst = GridTarget::new(&mut grid);

            for block in block_addresses(BITS, BPB, &cube(), level) {
                let n = block.num_samples();
                let payload: Vec<u8> = (0..n as u32).flat_map(|v| v.to_le_bytes()).collect();
                let view = BlockView {
                    from: block.from,
                    to: block.to,
                    stride: block.stride,
                    hz_address: block.hz_address,
                    hz_level: block.hz_level,
                    payload: &payload,
                };
                block_to_grid_hz(BITS, BPB, &view, W, &out, &cube(), &dst);

                for i in 0..n {
                    let coord = hz::hz_to_xyz(BITS, block.hz_address + i);
                    let at = grid_index(&out, coord) * W;
                    let got = u32::from_le_bytes(grid[at..at + W].try_into().unwrap());
                    assert_eq!(got as u64, i, "level {level} hz {:#x}", block.hz_address + i);
                }
            }
        }
    }

    #[test]
    fn first_block_fans_out_per_level() {
        // Block 0 carries hz 0..2^BPB; an hz-ordered payload must land at
        // hz_to_xyz(hz) on the inclusive lattice of level BPB.
        let samples = 1u32 << BPB;
        let payload: Vec<u8> = (0..samples).flat_map(|v| v.to_le_bytes()).collect();
        let out = Window {
            from: Vec3::ZERO,
            to: hz::last_coord(BITS, BPB),
            stride: hz::intra_level_strides(BITS, BPB + 1),
        };
        let mut grid = vec![0xffu8; out.dims().product() as usize * W];
        let dst = GridTarget::new(&mut grid);
        first_block_to_grid(BITS, BPB, &payload, W, &out, &cube(), &dst);

        for hz_address in 0..samples as u64 {
            let coord = hz::hz_to_xyz(BITS, hz_address);
            let at = grid_index(&out, coord) * W;
            let got = u32::from_le_bytes(grid[at..at + W].try_into().unwrap());
            assert_eq!(got as u64, hz_address);
        }
    }

    #[test]
    fn grid_to_block_mirrors_row_major_placement() {
        // Fill a full-resolution grid with v = x + 4y + 16z, extract one
        // block, and check the payload against the block's grid walk.
        let extent = cube();
        let grid_payload: Vec<u8> = (0..64u32).flat_map(|v| v.to_le_bytes()).collect();

        let block_from = Vec3::new(0, 0, 1);
        let block_to = Vec3::new(2, 2, 1);
        let block_stride = Vec3::new(2, 2, 2);
        let mut payload = vec![0u8; 4 * W];
        grid_to_block(
            &extent,
            &grid_payload,
            W,
            block_from,
            block_to,
            block_stride,
            &mut payload,
        );

        let mut expected = Vec::new();
        for y in [0i64, 2] {
            for x in [0i64, 2] {
                expected.push((x + 4 * y + 16) as u32);
            }
        }
        let got: Vec<u32> = payload
            .chunks_exact(W)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(got, expected);
    }
}
