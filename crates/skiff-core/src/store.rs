//! Flat-file record store.
//!
//! The store is a text file with one [`SandboxRecord`] per line. Every
//! mutation other than `append` reads the whole file and rewrites it: the
//! new content goes to a sibling `.tmp` file, synced to disk, which is then
//! renamed over the store, so readers see either the old or the new content. Lines a mutation
//! does not match are written back byte-for-byte.
//!
//! All operations on one store instance are serialized by a single async
//! mutex. Callers must not hold anything across runtime calls while waiting
//! on the store; the store never calls out to the runtime itself.

use crate::error::StoreError;
use crate::record::SandboxRecord;
use std::ffi::OsString;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

type StoreResult<T> = std::result::Result<T, StoreError>;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Durable owner → sandbox mapping.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RecordStore {
    /// Open a store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        tracing::debug!(path = %path.display(), "Opening record store");
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    ///
    /// A file whose last line lacks its newline is terminated first, so the
    /// new record always lands on a line of its own.
    pub async fn append(&self, record: &SandboxRecord) -> StoreResult<()> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_error(&self.path))?;

        let mut line = String::new();
        if !ends_with_newline(&mut file)
            .await
            .map_err(io_error(&self.path))?
        {
            tracing::warn!(path = %self.path.display(), "Store missing final newline; terminating last line");
            line.push('\n');
        }
        line.push_str(&record.to_line());
        line.push('\n');
        file.write_all(line.as_bytes())
            .await
            .map_err(io_error(&self.path))?;
        file.flush().await.map_err(io_error(&self.path))?;

        tracing::debug!(sandbox = %record.name, owner = %record.owner, "Record appended");
        Ok(())
    }

    /// Every record in store order. A missing file reads as empty.
    pub async fn read_all(&self) -> StoreResult<Vec<SandboxRecord>> {
        let _guard = self.lock.lock().await;
        let lines = self.read_lines().await?;
        Ok(lines
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| SandboxRecord::parse(l))
            .collect())
    }

    /// Rewrite the store with every record matching `predicate` replaced by
    /// `transform(record)`. Returns how many records were replaced.
    pub async fn replace_matching<P, F>(&self, predicate: P, transform: F) -> StoreResult<usize>
    where
        P: Fn(&SandboxRecord) -> bool,
        F: Fn(&SandboxRecord) -> SandboxRecord,
    {
        let _guard = self.lock.lock().await;
        let lines = self.read_lines().await?;

        let mut replaced = 0;
        let rewritten: Vec<String> = lines
            .into_iter()
            .map(|line| {
                if line.trim().is_empty() {
                    return line;
                }
                let record = SandboxRecord::parse(&line);
                if predicate(&record) {
                    replaced += 1;
                    transform(&record).to_line()
                } else {
                    line
                }
            })
            .collect();

        if replaced > 0 {
            self.write_lines(&rewritten).await?;
        }
        tracing::debug!(replaced, "Records replaced");
        Ok(replaced)
    }

    /// Rewrite the store without the records matching `predicate`.
    /// Returns how many records were removed.
    pub async fn remove_matching<P>(&self, predicate: P) -> StoreResult<usize>
    where
        P: Fn(&SandboxRecord) -> bool,
    {
        let _guard = self.lock.lock().await;
        let lines = self.read_lines().await?;
        let before = lines.len();

        let kept: Vec<String> = lines
            .into_iter()
            .filter(|line| line.trim().is_empty() || !predicate(&SandboxRecord::parse(line)))
            .collect();

        let removed = before - kept.len();
        if removed > 0 {
            self.write_lines(&kept).await?;
        }
        tracing::debug!(removed, "Records removed");
        Ok(removed)
    }

    /// Drop every record. Returns how many there were.
    pub async fn clear(&self) -> StoreResult<usize> {
        let _guard = self.lock.lock().await;
        let count = self
            .read_lines()
            .await?
            .iter()
            .filter(|l| !l.trim().is_empty())
            .count();
        self.write_lines(&[]).await?;
        tracing::info!(count, "Record store cleared");
        Ok(count)
    }

    /// Look up a record by owner and optional name.
    ///
    /// Without a name, the owner's first record in store order is returned.
    pub async fn find(&self, owner: &str, name: Option<&str>) -> StoreResult<Option<SandboxRecord>> {
        let records = self.records_for(owner).await?;
        Ok(match name {
            Some(name) => records.into_iter().find(|r| r.name == name),
            None => records.into_iter().next(),
        })
    }

    /// All records belonging to `owner`, in store order.
    pub async fn records_for(&self, owner: &str) -> StoreResult<Vec<SandboxRecord>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|r| r.owner == owner)
            .collect())
    }

    /// Whether any record uses `name`.
    pub async fn contains_name(&self, name: &str) -> StoreResult<bool> {
        Ok(self.read_all().await?.iter().any(|r| r.name == name))
    }

    /// Raw lines without terminators. Caller holds the lock.
    async fn read_lines(&self) -> StoreResult<Vec<String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.path)(e)),
        };
        let mut lines: Vec<String> = content.split('\n').map(String::from).collect();
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        Ok(lines)
    }

    /// Replace the file content via a temporary sibling. Caller holds the lock.
    async fn write_lines(&self, lines: &[String]) -> StoreResult<()> {
        let tmp = self.temp_path();
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(io_error(&tmp))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(io_error(&tmp))?;
        file.sync_all().await.map_err(io_error(&tmp))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(io_error(&self.path))?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

// True for an empty file or one whose last byte is `\n`.
async fn ends_with_newline(file: &mut tokio::fs::File) -> std::io::Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}
