//! Descriptor text format.
//!
//! A descriptor is line-oriented: each `(directive)` line is followed by
//! its value lines. Fields are listed one per line after `(fields)` until
//! the next directive.
//!
//! ```text
//! (version)
//! 6
//! (box)
//! 0 63 0 63 0 63 0 0 0 0
//! (fields)
//! heat float32 format(1)
//! (bits)
//! V210210210210210210
//! (bitsperblock)
//! 17
//! (blocksperfile)
//! 2
//! (time)
//! 0 0 time%06d/
//! (filename_template)
//! ./%04x.bin
//! ```

use super::{Dataset, Field, FieldType, FileNameTemplate, Layout, TimeRange};
use crate::compression::Compression;
use crate::error::{Result, VolumeError};
use crate::geometry::{Vec3, Volume};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

fn parse_err(msg: impl Into<String>) -> VolumeError {
    VolumeError::ParsingError(msg.into())
}

fn parse_int<T: std::str::FromStr>(s: &str, directive: &str) -> Result<T> {
    s.parse()
        .map_err(|_| parse_err(format!("bad integer {s:?} for {directive}")))
}

/// Splits `key(value)` into its parts; the value is empty when the
/// parentheses are missing.
fn split_key_value(token: &str) -> (&str, &str) {
    match (token.find('('), token.rfind(')')) {
        (Some(open), Some(close)) if open < close => (&token[..open], &token[open + 1..close]),
        _ => (token, ""),
    }
}

fn parse_field_line(line: &str) -> Result<Field> {
    let mut tokens = line.split_whitespace();
    let mut name = tokens.next().ok_or_else(|| parse_err("empty field line"))?;
    if name == "+" {
        name = tokens.next().ok_or_else(|| parse_err("field name missing after +"))?;
    } else if let Some(stripped) = name.strip_prefix('+') {
        name = stripped;
    }

    let type_token = tokens
        .next()
        .ok_or_else(|| parse_err(format!("field {name:?} is missing its type")))?;
    let ty = FieldType::parse(type_token)
        .ok_or_else(|| parse_err(format!("unknown field type {type_token:?}")))?;

    let mut field = Field {
        name: name.to_string(),
        ty,
        compression: Compression::None,
        layout: Layout::default(),
    };
    for token in tokens {
        let (key, value) = split_key_value(token);
        match key {
            "default_compression" => field.compression = Compression::from_name(value),
            // Legacy spelling; an unqualified "compressed" means zip.
            "compressed" => {
                field.compression = if value.is_empty() {
                    Compression::Zip
                } else {
                    Compression::from_name(value)
                };
            }
            "default_layout" | "format" => {
                let code: u32 = value
                    .parse()
                    .map_err(|_| parse_err(format!("bad layout value {value:?}")))?;
                field.layout = if code == 1 { Layout::RowMajor } else { Layout::Hz };
            }
            // Reserved keys, recognized and skipped.
            "filter" | "default_value" | "min" | "max" | "description" => {}
            other => return Err(parse_err(format!("unknown field key {other:?}"))),
        }
    }
    Ok(field)
}

fn parse_filename_template(line: &str) -> Result<FileNameTemplate> {
    let trimmed = line.strip_prefix("./").unwrap_or(line);
    let mut template = FileNameTemplate::default();
    let components: Vec<&str> = trimmed.split('/').filter(|c| !c.is_empty()).collect();
    for (i, component) in components.iter().enumerate() {
        let mut component = *component;
        if i + 1 == components.len() {
            if let Some(dot) = component.rfind('.') {
                template.ext = component[dot..].to_string();
                component = &component[..dot];
            }
        }
        if component.len() >= 3 && component.starts_with("%0") && component.ends_with('x') {
            let width: u32 = component[2..component.len() - 1]
                .parse()
                .map_err(|_| parse_err(format!("bad hex group {component:?}")))?;
            template.hex_groups.push(width);
        } else if !component.is_empty() {
            template.head.push(component);
        }
    }
    // Innermost group first, so path building can consume nibbles from the
    // least significant end.
    template.hex_groups.reverse();
    Ok(template)
}

/// Parses descriptor text. `root` anchors relative filename-template heads
/// and becomes [`Dataset::root`].
pub fn parse_dataset(text: &str, root: PathBuf) -> Result<Dataset> {
    let mut ds = Dataset {
        version: 0,
        logic_to_physic: [0.0; 16],
        bounds: Volume::default(),
        fields: Vec::new(),
        bits: String::new(),
        bits_per_block: 0,
        blocks_per_file: 0,
        interleave_block: 0,
        time: TimeRange::default(),
        filename_template: FileNameTemplate::default(),
        root,
    };

    let mut lines = text.lines().peekable();
    fn next_value<'b>(
        lines: &mut std::iter::Peekable<std::str::Lines<'b>>,
        directive: &str,
    ) -> Result<&'b str> {
        lines
            .next()
            .map(str::trim)
            .ok_or_else(|| parse_err(format!("{directive} is missing its value")))
    }

    while let Some(line) = lines.next() {
        let line = line.trim_end();
        match line {
            "" => {}
            "(version)" => ds.version = parse_int(next_value(&mut lines, line)?, line)?,
            "(logic_to_physic)" => {
                // Sixteen floats, possibly wrapped over several lines.
                let mut count = 0;
                while count < 16 {
                    let value_line = next_value(&mut lines, line)?;
                    for token in value_line.split_whitespace() {
                        if count == 16 {
                            break;
                        }
                        ds.logic_to_physic[count] = token
                            .parse()
                            .map_err(|_| parse_err(format!("bad float {token:?}")))?;
                        count += 1;
                    }
                }
            }
            "(box)" => {
                let value = next_value(&mut lines, line)?;
                let mut ints = value.split_whitespace().map(|t| parse_int(t, line));
                let mut six = [0i64; 6];
                for slot in six.iter_mut() {
                    *slot = ints
                        .next()
                        .ok_or_else(|| parse_err("box needs six integers"))??;
                }
                ds.bounds = Volume::new(
                    Vec3::new(six[0], six[2], six[4]),
                    Vec3::new(six[1], six[3], six[5]),
                );
            }
            "(fields)" => {
                while let Some(&peek) = lines.peek() {
                    let peek = peek.trim_end();
                    if peek.starts_with('(') {
                        break;
                    }
                    lines.next();
                    if peek.is_empty() {
                        continue;
                    }
                    ds.fields.push(parse_field_line(peek)?);
                }
            }
            "(bits)" => ds.bits = next_value(&mut lines, line)?.to_string(),
            "(bitsperblock)" => {
                ds.bits_per_block = parse_int(next_value(&mut lines, line)?, line)?
            }
            "(blocksperfile)" => {
                ds.blocks_per_file = parse_int(next_value(&mut lines, line)?, line)?
            }
            "(interleave block)" => {
                ds.interleave_block = parse_int(next_value(&mut lines, line)?, line)?
            }
            "(time)" => {
                let value = next_value(&mut lines, line)?;
                let mut tokens = value.split_whitespace();
                let begin = tokens
                    .next()
                    .ok_or_else(|| parse_err("time needs begin and end"))?;
                let end = tokens
                    .next()
                    .ok_or_else(|| parse_err("time needs begin and end"))?;
                ds.time.begin = parse_int(begin, line)?;
                ds.time.end = parse_int(end, line)?;
                ds.time.template = tokens.next().unwrap_or("").to_string();
            }
            "(filename_template)" => {
                ds.filename_template = parse_filename_template(next_value(&mut lines, line)?)?;
            }
            other => return Err(parse_err(format!("unrecognized line {other:?}"))),
        }
    }

    ds.verify()
        .map_err(|e| parse_err(format!("descriptor verification failed: {e}")))?;
    Ok(ds)
}

/// Reads a descriptor from disk, anchoring it at the file's directory.
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => VolumeError::FileNotFound(path.to_path_buf()),
        _ => VolumeError::Io(e),
    })?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let root = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    parse_dataset(&text, root)
}

/// Renders a descriptor back to its text form.
pub fn emit_dataset(ds: &Dataset) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "(version)\n{}", ds.version);
    out.push_str("(logic_to_physic)\n");
    for (i, v) in ds.logic_to_physic.iter().enumerate() {
        let sep = if i + 1 == 16 { '\n' } else { ' ' };
        let _ = write!(out, "{v}{sep}");
    }
    let (f, t) = (ds.bounds.from, ds.bounds.to);
    let _ = writeln!(out, "(box)\n{} {} {} {} {} {} 0 0 0 0", f.x, t.x, f.y, t.y, f.z, t.z);
    out.push_str("(fields)\n");
    for field in &ds.fields {
        let layout = match field.layout {
            Layout::RowMajor => 1,
            Layout::Hz => 0,
        };
        let _ = writeln!(out, "{} {} format({layout})", field.name, field.ty);
    }
    let _ = writeln!(out, "(bits)\n{}", ds.bits);
    let _ = writeln!(out, "(bitsperblock)\n{}", ds.bits_per_block);
    let _ = writeln!(out, "(blocksperfile)\n{}", ds.blocks_per_file);
    let _ = writeln!(out, "(interleave block)\n{}", ds.interleave_block);
    let _ = writeln!(
        out,
        "(time)\n{} {} {}",
        ds.time.begin, ds.time.end, ds.time.template
    );
    out.push_str("(filename_template)\n.");
    for component in ds.filename_template.head.components() {
        let _ = write!(out, "/{}", component.as_os_str().to_string_lossy());
    }
    // Outermost group first on disk, the reverse of the in-memory order.
    for width in ds.filename_template.hex_groups.iter().rev() {
        let _ = write!(out, "/%0{width}x");
    }
    let _ = writeln!(out, "{}", ds.filename_template.ext);
    out
}

/// Writes a descriptor file, creating parent directories as needed.
pub fn write_dataset(path: &Path, ds: &Dataset) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, emit_dataset(ds))?;
    Ok(())
}
