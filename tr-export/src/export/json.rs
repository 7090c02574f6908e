//! Pretty JSON output

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const INDENT: &[u8] = b"    ";

/// Write `value` to `path`, indented by four spaces, non-ASCII kept as is
pub fn write_pretty(path: &Path, value: &impl Serialize) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    to_writer(&mut writer, value).with_context(|| format!("writing {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn to_writer<W: Write>(writer: W, value: &impl Serialize) -> serde_json::Result<()> {
    let formatter = serde_json::ser::PrettyFormatter::with_indent(INDENT);
    let mut serializer = serde_json::Serializer::with_formatter(writer, formatter);
    value.serialize(&mut serializer)
}
