use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{AuditEvent, AuditSink};

/// Appends audit events to a CSV file, writing the header only for a new file
pub struct CsvAuditSink {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl CsvAuditSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create audit dir: {}", dir.display()))?;
        }

        let is_new = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open audit file: {}", path.display()))?;

        let writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);

        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, event: &AuditEvent) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("audit writer lock poisoned"))?;
        writer.serialize(event)?;
        writer.flush()?;
        Ok(())
    }
}

impl AuditSink for CsvAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(&event) {
            tracing::warn!(path = %self.path.display(), "Failed to write audit row: {}", e);
        }
    }
}
