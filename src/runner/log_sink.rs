//! Persisting the engine's log stream.
//!
//! Every non-blank line becomes one item of a YAML sequence, written as a
//! JSON flow value:
//!
//! ```yaml
//! - {"dt": "2025-01-07T10:00:00", "lvl": "info", "msg": "start"}
//! - "a line that was not JSON"
//! ```
//!
//! Each item is complete on its own line, so a file cut short by a killed
//! run still parses.

use std::io;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use serde_json::ser::Formatter;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// JSON with a space after `:` and `,`, which every YAML parser accepts as
/// flow style.
struct FlowFormatter;

impl Formatter for FlowFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

fn flow_json<T: Serialize + ?Sized>(value: &T) -> io::Result<String> {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, FlowFormatter);
    value.serialize(&mut serializer).map_err(io::Error::other)?;
    String::from_utf8(buf).map_err(io::Error::other)
}

/// Formats one log line as a sequence item, `None` for blank lines.
pub fn sequence_item(line: &str) -> io::Result<Option<String>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let payload = trimmed.strip_prefix("- ").unwrap_or(trimmed);
    let item = match serde_json::from_str::<Value>(payload) {
        Ok(value) => flow_json(&value)?,
        Err(_) => flow_json(trimmed)?,
    };
    Ok(Some(format!("- {}\n", item)))
}

/// Append-only log file.
pub struct LogSink {
    file: File,
    lines: usize,
}

impl LogSink {
    /// Creates (or truncates) the log file.
    pub async fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path).await?;
        Ok(Self { file, lines: 0 })
    }

    /// Appends a line. Blank lines are skipped.
    pub async fn write(&mut self, line: &str) -> io::Result<()> {
        if let Some(item) = sequence_item(line)? {
            self.file.write_all(item.as_bytes()).await?;
            self.lines += 1;
        }
        Ok(())
    }

    /// Flushes and closes the file, returning the number of items written.
    pub async fn finish(mut self) -> io::Result<usize> {
        self.file.flush().await?;
        Ok(self.lines)
    }
}
