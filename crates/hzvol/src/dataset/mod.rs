//! Dataset descriptor model.
//!
//! A dataset is described by a small text file (see [`parse`]) naming its
//! extent, fields, bit string, block geometry, time range, and the template
//! that maps block addresses to backing binary files. The descriptor is
//! immutable for the duration of any read or write call.

pub mod parse;

use crate::compression::Compression;
use crate::error::{Result, VolumeError};
use crate::geometry::{Vec3, Volume};
use crate::hz;
use std::path::{Path, PathBuf};

/// Upper bound on the number of fields a dataset may declare.
pub const MAX_FIELDS: usize = 512;

/// Primitive sample types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    /// Unsigned 8-bit integer.
    UInt8,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Unsigned 64-bit integer.
    UInt64,
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
}

impl PrimitiveType {
    /// Width of one primitive value in bytes.
    pub fn bytes(self) -> usize {
        match self {
            PrimitiveType::UInt8 | PrimitiveType::Int8 => 1,
            PrimitiveType::UInt16 | PrimitiveType::Int16 => 2,
            PrimitiveType::UInt32 | PrimitiveType::Int32 | PrimitiveType::Float32 => 4,
            PrimitiveType::UInt64 | PrimitiveType::Int64 | PrimitiveType::Float64 => 8,
        }
    }

    /// Parses a descriptor type name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "uint8" => Some(PrimitiveType::UInt8),
            "uint16" => Some(PrimitiveType::UInt16),
            "uint32" => Some(PrimitiveType::UInt32),
            "uint64" => Some(PrimitiveType::UInt64),
            "int8" => Some(PrimitiveType::Int8),
            "int16" => Some(PrimitiveType::Int16),
            "int32" => Some(PrimitiveType::Int32),
            "int64" => Some(PrimitiveType::Int64),
            "float32" => Some(PrimitiveType::Float32),
            "float64" => Some(PrimitiveType::Float64),
            _ => None,
        }
    }

    /// The descriptor type name.
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::UInt8 => "uint8",
            PrimitiveType::UInt16 => "uint16",
            PrimitiveType::UInt32 => "uint32",
            PrimitiveType::UInt64 => "uint64",
            PrimitiveType::Int8 => "int8",
            PrimitiveType::Int16 => "int16",
            PrimitiveType::Int32 => "int32",
            PrimitiveType::Int64 => "int64",
            PrimitiveType::Float32 => "float32",
            PrimitiveType::Float64 => "float64",
        }
    }
}

/// The type of one field: a primitive and a component count, e.g.
/// `float64[3]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldType {
    /// The primitive of each component.
    pub primitive: PrimitiveType,
    /// Number of components per sample, >= 1.
    pub components: u32,
}

impl FieldType {
    /// Width of one sample in bytes.
    pub fn bytes(&self) -> usize {
        self.primitive.bytes() * self.components as usize
    }

    /// Parses a descriptor type token: `float64`, `3*float64`, or
    /// `float64[3]`.
    pub fn parse(token: &str) -> Option<Self> {
        if let Some(open) = token.find('[') {
            let close = token.find(']')?;
            let primitive = PrimitiveType::from_name(&token[..open])?;
            let components: u32 = token[open + 1..close].parse().ok()?;
            return Some(FieldType { primitive, components });
        }
        if let Some(star) = token.find('*') {
            let components: u32 = token[..star].parse().ok()?;
            let primitive = PrimitiveType::from_name(&token[star + 1..])?;
            return Some(FieldType { primitive, components });
        }
        let primitive = PrimitiveType::from_name(token)?;
        Some(FieldType { primitive, components: 1 })
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.components > 1 {
            write!(f, "{}[{}]", self.primitive.name(), self.components)
        } else {
            f.write_str(self.primitive.name())
        }
    }
}

/// How samples are ordered inside a block payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Samples follow the hz curve.
    #[default]
    Hz,
    /// Samples are row-major over the block's grid.
    RowMajor,
}

/// One field of a dataset.
#[derive(Debug, Clone)]
pub struct Field {
    /// Field name, unique within the dataset.
    pub name: String,
    /// Sample type.
    pub ty: FieldType,
    /// Default compression for newly written blocks.
    pub compression: Compression,
    /// Default payload layout for newly written blocks.
    pub layout: Layout,
}

impl Field {
    fn is_valid(&self) -> bool {
        !self.name.is_empty() && self.ty.components >= 1
    }
}

/// Inclusive time-step range plus the printf-style template that turns a
/// step into a path prefix.
#[derive(Debug, Clone, Default)]
pub struct TimeRange {
    /// First time step.
    pub begin: i32,
    /// Last time step.
    pub end: i32,
    /// Template such as `time%06d/`.
    pub template: String,
}

impl TimeRange {
    /// Expands the template for a time step. Supports the `%d` and `%0Nd`
    /// conversions used by descriptor files; everything else is literal.
    pub fn prefix(&self, time: i32) -> String {
        let mut out = String::with_capacity(self.template.len() + 8);
        let bytes = self.template.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j < bytes.len() && bytes[j] == b'd' {
                    let width: usize = self.template[i + 1..j].parse().unwrap_or(0);
                    out.push_str(&format!("{time:0width$}"));
                    i = j + 1;
                    continue;
                }
            }
            out.push(bytes[i] as char);
            i += 1;
        }
        out
    }
}

/// Template mapping a block address to its backing file path: a fixed head,
/// hex digit groups, and an extension.
///
/// `hex_groups` is stored innermost-first: `hex_groups[0]` is the deepest
/// path component and consumes the least significant nibbles of the
/// address. When the address outgrows the configured groups, the last
/// (outermost) group width repeats.
#[derive(Debug, Clone, Default)]
pub struct FileNameTemplate {
    /// Fixed directory components before the hex groups.
    pub head: PathBuf,
    /// Nibble count of each hex path component, innermost first.
    pub hex_groups: Vec<u32>,
    /// File extension including the dot, e.g. `.bin`.
    pub ext: String,
}

/// An immutable dataset descriptor.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Format version, > 0.
    pub version: i32,
    /// Informational logical-to-physical 4x4 transform, row-major.
    pub logic_to_physic: [f64; 16],
    /// Extent of the volume, inclusive at both ends.
    pub bounds: Volume,
    /// Declared fields, at most [`MAX_FIELDS`].
    pub fields: Vec<Field>,
    /// Raw bits directive value: a `V` sentinel followed by the bit string.
    pub bits: String,
    /// Log2 of the number of samples per block.
    pub bits_per_block: u32,
    /// Number of blocks per backing file.
    pub blocks_per_file: u32,
    /// Interleave directive, informational.
    pub interleave_block: u32,
    /// Time-step range and template.
    pub time: TimeRange,
    /// Backing-file naming template.
    pub filename_template: FileNameTemplate,
    /// Absolute directory that anchors relative template heads.
    pub root: PathBuf,
}

impl Dataset {
    /// Reads and verifies a descriptor file.
    pub fn open(path: &Path) -> Result<Dataset> {
        parse::read_dataset(path)
    }

    /// The bit string without its `V` sentinel.
    pub fn bit_string(&self) -> &str {
        &self.bits[1..]
    }

    /// The finest hz level, equal to the bit string's length.
    pub fn max_hz_level(&self) -> u32 {
        self.bit_string().len() as u32
    }

    /// The coarsest level stored outside block 0. Levels below this
    /// collapse into the first block.
    pub fn min_hz_level(&self) -> u32 {
        self.bits_per_block + 1
    }

    /// Number of samples in every block.
    pub fn samples_per_block(&self) -> u64 {
        1u64 << self.bits_per_block
    }

    /// Index of a field by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Number of time steps.
    pub fn num_time_steps(&self) -> i32 {
        self.time.end - self.time.begin + 1
    }

    /// The dataset's extent.
    pub fn logical_extent(&self) -> Volume {
        self.bounds
    }

    /// The level-`hz_level` sample grid restricted to `sub_vol`:
    /// `(from, to, stride)`, or `None` when no sample of the level falls
    /// inside.
    pub fn grid(&self, sub_vol: &Volume, hz_level: u32) -> Option<(Vec3, Vec3, Vec3)> {
        debug_assert!(sub_vol.is_valid() && sub_vol.is_inside(&self.bounds));
        debug_assert!(hz_level <= self.max_hz_level());
        let bits = self.bit_string();
        let stride = hz::intra_level_strides(bits, hz_level);
        let start = hz::first_coord(bits, hz_level);
        let end = hz::last_coord(bits, hz_level);
        hz::intersect_grid(sub_vol, start, end, stride).map(|(f, t)| (f, t, stride))
    }

    /// The grid holding every level up to and including `hz_level`,
    /// restricted to `sub_vol`. Its stride is one level finer than the
    /// level's own grid so that coarser levels interleave into it.
    pub fn grid_inclusive(&self, sub_vol: &Volume, hz_level: u32) -> Option<(Vec3, Vec3, Vec3)> {
        debug_assert!(sub_vol.is_valid() && sub_vol.is_inside(&self.bounds));
        debug_assert!(hz_level <= self.max_hz_level());
        let bits = self.bit_string();
        let stride = hz::intra_level_strides(bits, hz_level + 1);
        let end = hz::last_coord(bits, hz_level);
        hz::intersect_grid(sub_vol, Vec3::ZERO, end, stride).map(|(f, t)| (f, t, stride))
    }

    /// Dimensions of the level grid inside `sub_vol`.
    pub fn dims_at_level(&self, sub_vol: &Volume, hz_level: u32) -> Vec3 {
        match self.grid(sub_vol, hz_level) {
            Some((from, to, stride)) => (to - from) / stride + 1,
            None => Vec3::ZERO,
        }
    }

    /// Dimensions of the inclusive grid inside `sub_vol`.
    pub fn dims_inclusive(&self, sub_vol: &Volume, hz_level: u32) -> Vec3 {
        match self.grid_inclusive(sub_vol, hz_level) {
            Some((from, to, stride)) => (to - from) / stride + 1,
            None => Vec3::ZERO,
        }
    }

    /// Size in bytes of `sub_vol` at full resolution for a field.
    pub fn size_of_volume(&self, sub_vol: &Volume, field: usize) -> u64 {
        sub_vol.num_samples() * self.fields[field].ty.bytes() as u64
    }

    /// Size in bytes of the level grid inside `sub_vol` for a field.
    pub fn size_at_level(&self, sub_vol: &Volume, field: usize, hz_level: u32) -> u64 {
        self.dims_at_level(sub_vol, hz_level).product() * self.fields[field].ty.bytes() as u64
    }

    /// Size in bytes of the inclusive grid inside `sub_vol` for a field.
    pub fn size_inclusive(&self, sub_vol: &Volume, field: usize, hz_level: u32) -> u64 {
        self.dims_inclusive(sub_vol, hz_level).product() * self.fields[field].ty.bytes() as u64
    }

    /// Checks every descriptor invariant, returning the first violation.
    pub fn verify(&self) -> Result<()> {
        let fail = |msg: &str| Err(VolumeError::InvalidDataset(msg.to_string()));
        if self.version <= 0 {
            return fail("version must be positive");
        }
        let b = &self.bounds;
        if !(b.from.x >= 0 && b.from.y >= 0 && b.from.z >= 0) || !b.is_valid() {
            return fail("box must be non-negative with from <= to");
        }
        if self.fields.is_empty() || self.fields.len() > MAX_FIELDS {
            return fail("field count out of range");
        }
        if let Some(f) = self.fields.iter().find(|f| !f.is_valid()) {
            return Err(VolumeError::InvalidDataset(format!("invalid field {:?}", f.name)));
        }
        if !self.bits.starts_with('V') {
            return fail("bits directive missing its V sentinel");
        }
        if !hz::is_valid_bit_string(self.bit_string()) {
            return fail("malformed bit string");
        }
        if self.bits_per_block == 0 {
            return fail("bitsperblock must be >= 1");
        }
        if self.blocks_per_file == 0 {
            return fail("blocksperfile must be >= 1");
        }
        match self.filename_template.hex_groups.first() {
            Some(&w) if w > 0 => {}
            _ => return fail("filename template needs at least one hex group"),
        }
        Ok(())
    }

    /// Builds a descriptor for a new dataset of `dims` samples and
    /// `num_fields` fields of type `type_name` (e.g. `"int32"` or
    /// `"3*float64"`), with fields named `data0..dataN-1`. Blocks hold
    /// roughly one mebibyte of samples, capped so a block never exceeds the
    /// volume; files hold at most 256 blocks. The descriptor is anchored at
    /// `path`'s directory but not written; see [`parse::write_dataset`].
    pub fn create(
        dims: Vec3,
        num_fields: usize,
        type_name: &str,
        num_time_steps: i32,
        path: &Path,
    ) -> Result<Dataset> {
        if dims.x <= 0 || dims.y <= 0 || dims.z <= 0 {
            return Err(VolumeError::InvalidDataset("dimensions must be positive".into()));
        }
        if num_fields == 0 || num_fields > MAX_FIELDS {
            return Err(VolumeError::InvalidDataset("field count out of range".into()));
        }
        if num_time_steps <= 0 {
            return Err(VolumeError::InvalidDataset("need at least one time step".into()));
        }
        let ty = FieldType::parse(type_name)
            .ok_or_else(|| VolumeError::InvalidDataset(format!("unknown type {type_name:?}")))?;

        let fields = (0..num_fields)
            .map(|i| Field {
                name: format!("data{i}"),
                ty,
                compression: Compression::None,
                layout: Layout::RowMajor,
            })
            .collect();

        let bit_string = hz::guess_bit_string(dims);
        let pow2_dims = Vec3::new(
            hz::pow_greater_equal(2, dims.x),
            hz::pow_greater_equal(2, dims.y),
            hz::pow_greater_equal(2, dims.z),
        );
        let total_samples = pow2_dims.product();

        // Aim for blocks of about one mebibyte worth of samples.
        let mut bits_per_block = hz::log_int(2, 1024 * 1024);
        if 1u64 << bits_per_block > dims.product() {
            bits_per_block = hz::log_int(2, total_samples) - 1;
        }
        let num_blocks = (total_samples >> bits_per_block).max(1);
        let blocks_per_file = num_blocks.min(256) as u32;

        let mut logic_to_physic = [0.0; 16];
        for i in 0..4 {
            logic_to_physic[i * 4 + i] = 1.0;
        }

        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Dataset {
            version: 6,
            logic_to_physic,
            bounds: Volume::new(Vec3::ZERO, dims + -1),
            fields,
            bits: format!("V{bit_string}"),
            bits_per_block,
            blocks_per_file,
            interleave_block: 0,
            time: TimeRange {
                begin: 0,
                end: num_time_steps - 1,
                template: "time%06d/".to_string(),
            },
            filename_template: FileNameTemplate {
                head: PathBuf::new(),
                hex_groups: vec![hz::log_int(16, total_samples)],
                ext: ".bin".to_string(),
            },
            root,
        })
    }
}
