use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::crawler::task::OrganizationRecord;

/// Append-only local log of records the result store could not take.
/// Never read back by workers; recovery happens out of band.
pub struct FallbackLog {
    path: PathBuf,
}

impl FallbackLog {
    /// Log file for one worker inside `dir`
    pub fn for_worker(dir: &Path, worker_id: &str) -> Self {
        let file_name = format!("fallback_{}.csv", sanitize(worker_id));
        Self { path: dir.join(file_name) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, writing the header first if the file is new
    pub async fn append(&self, record: &OrganizationRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let needs_header = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .context(format!("Failed to open fallback log: {}", self.path.display()))?;

        let mut chunk = String::new();
        if needs_header {
            chunk.push_str(&OrganizationRecord::csv_header());
            chunk.push('\n');
        }
        chunk.push_str(&record.csv_row());
        chunk.push('\n');

        file.write_all(chunk.as_bytes())
            .await
            .context(format!("Failed to write fallback log: {}", self.path.display()))?;
        file.flush().await?;

        debug!("Wrote {} to fallback log {}", record.domain, self.path.display());
        Ok(())
    }
}

/// Records waiting in every fallback log under `dir`
pub async fn pending_count(dir: &Path) -> Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).context(format!("Failed to read {}", dir.display())),
    };

    let mut total = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "csv") {
            continue;
        }
        match fs::read_to_string(&path).await {
            Ok(contents) => total += count_records(&contents),
            Err(e) => warn!("Skipping unreadable fallback log {}: {}", path.display(), e),
        }
    }

    Ok(total)
}

/// Data rows in a log, ignoring the header and quoted line breaks
fn count_records(contents: &str) -> usize {
    let mut rows: usize = 0;
    let mut in_quotes = false;
    let mut line_has_data = false;
    for c in contents.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                line_has_data = true;
            }
            '\n' if !in_quotes => {
                if line_has_data {
                    rows += 1;
                }
                line_has_data = false;
            }
            _ => line_has_data = true,
        }
    }
    if line_has_data {
        rows += 1;
    }
    rows.saturating_sub(1)
}

fn sanitize(worker_id: &str) -> String {
    worker_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
