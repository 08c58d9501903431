//! Per-stream record buffers.
//!
//! Records are always kept in memory for the run output. When a record directory is configured
//! each buffer also spills to `<dir>/<stream>.jsonl`, written through a temporary file that is
//! only renamed into place when the buffer is closed. A discarded buffer removes its temporary
//! file, so an aborted run never leaves a partial stream file behind.

use std::{
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde_json::Value;
use tempfile::NamedTempFile;

#[derive(Debug)]
pub(crate) struct StreamBuffer {
    records: Vec<Value>,
    spill: Option<SpillFile>,
}

impl StreamBuffer {
    pub(crate) fn in_memory() -> Self {
        Self {
            records: Vec::new(),
            spill: None,
        }
    }

    pub(crate) fn with_spill(dir: &Path, stream: &str) -> io::Result<Self> {
        Ok(Self {
            records: Vec::new(),
            spill: Some(SpillFile::create(dir, stream)?),
        })
    }

    pub(crate) fn append(&mut self, record: Value) -> io::Result<()> {
        if let Some(spill) = self.spill.as_mut() {
            spill.append(&record)?;
        }
        self.records.push(record);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Flushes and persists the spill file, if any.
    pub(crate) fn close(self) -> io::Result<(Vec<Value>, Option<PathBuf>)> {
        let path = self.spill.map(SpillFile::persist).transpose()?;
        Ok((self.records, path))
    }

    pub(crate) fn discard(self) {
        drop(self.spill);
    }
}

#[derive(Debug)]
struct SpillFile {
    final_path: PathBuf,
    writer: BufWriter<NamedTempFile>,
}

impl SpillFile {
    fn create(dir: &Path, stream: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file_stem = sanitize_file_stem(stream);
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{file_stem}."))
            .suffix(".partial")
            .tempfile_in(dir)?;
        Ok(Self {
            final_path: dir.join(format!("{file_stem}.jsonl")),
            writer: BufWriter::new(temp),
        })
    }

    fn append(&mut self, record: &Value) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")
    }

    fn persist(self) -> io::Result<PathBuf> {
        let temp = self.writer.into_inner().map_err(|err| err.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.final_path).map_err(|err| err.error)?;
        Ok(self.final_path)
    }
}

/// Stream names come from the tap; keep file names to a safe ASCII subset.
fn sanitize_file_stem(stream: &str) -> String {
    let stem: String = stream
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() || stem.starts_with('.') {
        format!("_{stem}")
    } else {
        stem
    }
}
