//! hzvol - Hierarchical Z-order Volume Storage Engine
//!
//! This crate reads and writes hierarchical, multi-resolution 3D volumes:
//! a dataset is a text descriptor plus binary backing files that pack
//! fixed-size sample *blocks* addressed along a hierarchical Z-order (hz)
//! curve. Coarse resolutions come first on the curve, so a partial read
//! yields a complete low-resolution volume that later levels refine.
//!
//! # Components
//!
//! - [`Dataset`]: the descriptor model (extent, fields, bit string, block
//!   geometry, filename template)
//! - [`hz`]: the bit-string algebra mapping coordinates to and from hz
//!   indices
//! - [`Engine`]: parallel block reads into caller-owned grids and
//!   read-modify-write block writes
//!
//! # Example
//!
//! ```rust,ignore
//! use hzvol::{Dataset, Engine, Grid};
//!
//! let ds = Dataset::open("volume.idx".as_ref())?;
//! let field = ds.field_index("heat").unwrap();
//! let level = ds.max_hz_level();
//!
//! let extent = ds.logical_extent();
//! let bytes = ds.size_inclusive(&extent, field, level) as usize;
//! let mut grid = Grid::new(extent, bytes);
//!
//! let engine = Engine::new()?;
//! let stats = engine.read_grid_inclusive(&ds, field, 0, level, &mut grid)?;
//! assert!(stats.is_complete());
//! ```

#![deny(missing_docs)]

pub mod alloc;
pub mod block;
pub mod compression;
pub mod dataset;
pub mod error;
pub mod geometry;
pub mod hz;

mod engine;
mod placement;

pub use compression::Compression;
pub use dataset::parse::{read_dataset, write_dataset};
pub use dataset::{Dataset, Field, FieldType, Layout, PrimitiveType};
pub use engine::{Engine, ReadStats};
pub use error::{Result, VolumeError};
pub use geometry::{Grid, Vec3, Volume};
