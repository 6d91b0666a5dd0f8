//! End-to-end write/read tests against datasets on disk.

use hzvol::{Dataset, Engine, Grid, Vec3, Volume, VolumeError};
use std::path::Path;
use tempfile::TempDir;

/// Creates a dataset descriptor on disk and reopens it through the
/// parser, so every test exercises the full descriptor round trip.
fn dataset_on_disk(
    dir: &Path,
    dims: Vec3,
    num_fields: usize,
    type_name: &str,
    num_time_steps: i32,
) -> Dataset {
    let path = dir.join("vol.idx");
    let ds = Dataset::create(dims, num_fields, type_name, num_time_steps, &path).unwrap();
    hzvol::write_dataset(&path, &ds).unwrap();
    Dataset::open(&path).unwrap()
}

/// Like [`dataset_on_disk`] but with a finer block structure, so a small
/// volume still spans many blocks and several backing files.
fn multiblock_dataset(dir: &Path, dims: Vec3, type_name: &str) -> Dataset {
    let path = dir.join("vol.idx");
    let mut ds = Dataset::create(dims, 1, type_name, 1, &path).unwrap();
    ds.bits_per_block = 6;
    ds.blocks_per_file = 4;
    hzvol::write_dataset(&path, &ds).unwrap();
    Dataset::open(&path).unwrap()
}

fn fill_i32(extent: &Volume) -> Vec<u8> {
    (0..extent.num_samples() as i32)
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn sample_i32(grid: &Grid, coord: Vec3) -> i32 {
    let dims = grid.extent.dims();
    let c = coord - grid.extent.from;
    let at = (c.x + c.y * dims.x + c.z * dims.x * dims.y) as usize * 4;
    i32::from_le_bytes(grid.data[at..at + 4].try_into().unwrap())
}

/// The row-major value a full-volume fill puts at a coordinate.
fn expected_i32(bounds: &Volume, coord: Vec3) -> i32 {
    let dims = bounds.dims();
    (coord.x + coord.y * dims.x + coord.z * dims.x * dims.y) as i32
}

#[test]
fn write_then_read_inclusive_is_identity() {
    let dir = TempDir::new().unwrap();
    let ds = dataset_on_disk(dir.path(), Vec3::new(32, 32, 32), 1, "int32", 1);
    let engine = Engine::new().unwrap();
    let extent = ds.logical_extent();
    let max = ds.max_hz_level();

    let grid = Grid {
        extent,
        data: fill_i32(&extent),
    };
    engine.write_grid(&ds, 0, 0, &grid).unwrap();

    let bytes = ds.size_inclusive(&extent, 0, max) as usize;
    let mut back = Grid::new(extent, bytes);
    let stats = engine.read_grid_inclusive(&ds, 0, 0, max, &mut back).unwrap();
    assert!(stats.is_complete());
    assert_eq!(back.data, grid.data);
}

#[test]
fn multiblock_roundtrip_spans_many_files() {
    let dir = TempDir::new().unwrap();
    let ds = multiblock_dataset(dir.path(), Vec3::new(16, 16, 16), "int32");
    assert_eq!(ds.min_hz_level(), 7);
    let engine = Engine::new().unwrap();
    let extent = ds.logical_extent();
    let max = ds.max_hz_level();

    let grid = Grid {
        extent,
        data: fill_i32(&extent),
    };
    engine.write_grid(&ds, 0, 0, &grid).unwrap();

    // 4096 samples over 64-sample blocks, 4 blocks per file.
    let backing: Vec<_> = walkdir(dir.path())
        .into_iter()
        .filter(|p| p.extension().is_some_and(|e| e == "bin"))
        .collect();
    assert_eq!(backing.len(), 16);

    let mut back = Grid::new(extent, ds.size_inclusive(&extent, 0, max) as usize);
    let stats = engine.read_grid_inclusive(&ds, 0, 0, max, &mut back).unwrap();
    assert!(stats.is_complete());
    assert_eq!(back.data, grid.data);
}

#[test]
fn non_power_of_two_volume_roundtrips() {
    let dir = TempDir::new().unwrap();
    let ds = dataset_on_disk(dir.path(), Vec3::new(20, 17, 9), 1, "float32", 1);
    let engine = Engine::new().unwrap();
    let extent = ds.logical_extent();
    let max = ds.max_hz_level();

    let data: Vec<u8> = (0..extent.num_samples())
        .flat_map(|v| (v as f32).sqrt().to_le_bytes())
        .collect();
    let grid = Grid { extent, data };
    engine.write_grid(&ds, 0, 0, &grid).unwrap();

    let mut back = Grid::new(extent, ds.size_inclusive(&extent, 0, max) as usize);
    let stats = engine.read_grid_inclusive(&ds, 0, 0, max, &mut back).unwrap();
    assert!(stats.is_complete());
    assert_eq!(back.data, grid.data);
}

#[test]
fn level_reads_subsample_the_volume() {
    let dir = TempDir::new().unwrap();
    let ds = multiblock_dataset(dir.path(), Vec3::new(16, 16, 16), "int32");
    let engine = Engine::new().unwrap();
    let extent = ds.logical_extent();

    let grid = Grid {
        extent,
        data: fill_i32(&extent),
    };
    engine.write_grid(&ds, 0, 0, &grid).unwrap();

    // Each stored level's lattice must read back exactly the fill values.
    for level in ds.min_hz_level()..=ds.max_hz_level() {
        let (from, to, stride) = ds.grid(&extent, level).unwrap();
        let mut back = Grid::new(extent, ds.size_at_level(&extent, 0, level) as usize);
        let stats = engine.read_grid(&ds, 0, 0, level, &mut back).unwrap();
        assert!(stats.is_complete(), "level {level}");

        let dims = (to - from) / stride + 1;
        let mut z = from.z;
        while z <= to.z {
            let mut y = from.y;
            while y <= to.y {
                let mut x = from.x;
                while x <= to.x {
                    let c = (Vec3::new(x, y, z) - from) / stride;
                    let at = (c.x + c.y * dims.x + c.z * dims.x * dims.y) as usize * 4;
                    let got = i32::from_le_bytes(back.data[at..at + 4].try_into().unwrap());
                    assert_eq!(
                        got,
                        expected_i32(&ds.bounds, Vec3::new(x, y, z)),
                        "level {level} sample ({x},{y},{z})"
                    );
                    x += stride.x;
                }
                y += stride.y;
            }
            z += stride.z;
        }
    }
}

#[test]
fn slice_read_returns_the_plane() {
    let dir = TempDir::new().unwrap();
    let ds = multiblock_dataset(dir.path(), Vec3::new(16, 16, 16), "int32");
    let engine = Engine::new().unwrap();
    let extent = ds.logical_extent();
    let max = ds.max_hz_level();

    let grid = Grid {
        extent,
        data: fill_i32(&extent),
    };
    engine.write_grid(&ds, 0, 0, &grid).unwrap();

    let slice = Volume::new(Vec3::new(5, 0, 0), Vec3::new(5, 15, 15));
    let mut back = Grid::new(slice, ds.size_inclusive(&slice, 0, max) as usize);
    let stats = engine.read_grid_inclusive(&ds, 0, 0, max, &mut back).unwrap();
    assert!(stats.is_complete());

    for z in 0..16 {
        for y in 0..16 {
            let coord = Vec3::new(5, y, z);
            assert_eq!(sample_i32(&back, coord), expected_i32(&ds.bounds, coord));
        }
    }
}

#[test]
fn overwrite_replaces_stored_samples() {
    let dir = TempDir::new().unwrap();
    let ds = multiblock_dataset(dir.path(), Vec3::new(16, 16, 16), "int32");
    let engine = Engine::new().unwrap();
    let extent = ds.logical_extent();
    let max = ds.max_hz_level();

    let first = Grid {
        extent,
        data: fill_i32(&extent),
    };
    engine.write_grid(&ds, 0, 0, &first).unwrap();

    let second = Grid {
        extent,
        data: (0..extent.num_samples() as i32)
            .flat_map(|v| (v * 7 + 1).to_le_bytes())
            .collect(),
    };
    engine.write_grid(&ds, 0, 0, &second).unwrap();

    let mut back = Grid::new(extent, ds.size_inclusive(&extent, 0, max) as usize);
    engine.read_grid_inclusive(&ds, 0, 0, max, &mut back).unwrap();
    assert_eq!(back.data, second.data);
}

#[test]
fn partial_write_leaves_other_blocks_absent() {
    let dir = TempDir::new().unwrap();
    let ds = multiblock_dataset(dir.path(), Vec3::new(16, 16, 16), "int32");
    let engine = Engine::new().unwrap();
    let extent = ds.logical_extent();
    let max = ds.max_hz_level();

    // Fill only one corner of the volume.
    let corner = Volume::new(Vec3::ZERO, Vec3::new(7, 7, 7));
    let corner_grid = Grid {
        extent: corner,
        data: fill_i32(&corner),
    };
    engine.write_grid(&ds, 0, 0, &corner_grid).unwrap();

    let mut back = Grid::new(extent, ds.size_inclusive(&extent, 0, max) as usize);
    let stats = engine.read_grid_inclusive(&ds, 0, 0, max, &mut back).unwrap();
    assert!(!stats.is_complete());
    assert!(stats.missing_files > 0);

    // The written corner reads back; elsewhere the buffer keeps its zeros.
    for z in 0..8 {
        for y in 0..8 {
            for x in 0..8 {
                let coord = Vec3::new(x, y, z);
                assert_eq!(sample_i32(&back, coord), expected_i32(&corner, coord));
            }
        }
    }
    assert_eq!(sample_i32(&back, Vec3::new(15, 15, 15)), 0);
}

#[test]
fn fields_are_stored_independently() {
    let dir = TempDir::new().unwrap();
    let ds = dataset_on_disk(dir.path(), Vec3::new(16, 16, 16), 2, "int32", 1);
    let engine = Engine::new().unwrap();
    let extent = ds.logical_extent();
    let max = ds.max_hz_level();

    let a = Grid {
        extent,
        data: fill_i32(&extent),
    };
    let b = Grid {
        extent,
        data: (0..extent.num_samples() as i32)
            .flat_map(|v| (-v).to_le_bytes())
            .collect(),
    };
    engine.write_grid(&ds, 0, 0, &a).unwrap();
    engine.write_grid(&ds, 1, 0, &b).unwrap();

    let mut back = Grid::new(extent, ds.size_inclusive(&extent, 0, max) as usize);
    assert!(engine.read_grid_inclusive(&ds, 0, 0, max, &mut back).unwrap().is_complete());
    assert_eq!(back.data, a.data);

    let mut back = Grid::new(extent, ds.size_inclusive(&extent, 1, max) as usize);
    assert!(engine.read_grid_inclusive(&ds, 1, 0, max, &mut back).unwrap().is_complete());
    assert_eq!(back.data, b.data);
}

#[test]
fn unwritten_time_step_reads_as_missing() {
    let dir = TempDir::new().unwrap();
    let ds = dataset_on_disk(dir.path(), Vec3::new(16, 16, 16), 1, "int32", 2);
    let engine = Engine::new().unwrap();
    let extent = ds.logical_extent();
    let max = ds.max_hz_level();

    let grid = Grid {
        extent,
        data: fill_i32(&extent),
    };
    engine.write_grid(&ds, 0, 1, &grid).unwrap();

    let mut back = Grid::new(extent, ds.size_inclusive(&extent, 0, max) as usize);
    let stats = engine.read_grid_inclusive(&ds, 0, 0, max, &mut back).unwrap();
    assert!(stats.missing_files > 0);
    assert!(back.data.iter().all(|&b| b == 0));

    let stats = engine.read_grid_inclusive(&ds, 0, 1, max, &mut back).unwrap();
    assert!(stats.is_complete());
    assert_eq!(back.data, grid.data);
}

#[test]
fn invalid_queries_fail_fast() {
    let dir = TempDir::new().unwrap();
    let ds = dataset_on_disk(dir.path(), Vec3::new(16, 16, 16), 1, "int32", 1);
    let engine = Engine::new().unwrap();
    let max = ds.max_hz_level();

    let inside = Volume::new(Vec3::ZERO, Vec3::new(7, 7, 7));
    let mut grid = Grid::new(inside, 8 * 8 * 8 * 4);

    assert!(matches!(
        engine.read_grid_inclusive(&ds, 3, 0, max, &mut grid),
        Err(VolumeError::FieldNotFound(3))
    ));
    assert!(matches!(
        engine.read_grid_inclusive(&ds, 0, 5, max, &mut grid),
        Err(VolumeError::TimeStepNotFound(5))
    ));
    assert!(matches!(
        engine.read_grid_inclusive(&ds, 0, 0, max + 1, &mut grid),
        Err(VolumeError::InvalidHzLevel { .. })
    ));

    let outside = Volume::new(Vec3::ZERO, Vec3::new(16, 7, 7));
    let mut grid = Grid::new(outside, 4096);
    assert!(matches!(
        engine.read_grid_inclusive(&ds, 0, 0, max, &mut grid),
        Err(VolumeError::VolumeTooBig)
    ));

    let inverted = Volume::new(Vec3::new(4, 0, 0), Vec3::new(3, 7, 7));
    let mut grid = Grid::new(inverted, 4096);
    assert!(matches!(
        engine.read_grid_inclusive(&ds, 0, 0, max, &mut grid),
        Err(VolumeError::InvalidVolume)
    ));

    // Writes validate the same way.
    let grid = Grid::new(outside, 4096);
    assert!(matches!(
        engine.write_grid(&ds, 0, 0, &grid),
        Err(VolumeError::VolumeTooBig)
    ));
}

/// Minimal recursive directory listing, enough to count backing files.
fn walkdir(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}
