//! JSON artifacts on disk: input corpus, predictions file, atomic rewrites.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::pipeline::PredictionSink;
use crate::thread::{Prediction, Thread};

/// Write `value` as pretty JSON via a sibling tmp file + rename, so readers
/// see either the old or the new content.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(&json)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), bytes = json.len(), "json artifact written");
    Ok(())
}

/// `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Input corpus: a JSON array of threads.
pub fn load_threads(path: &Path) -> Result<Vec<Thread>> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// The predictions artifact the review stage reads.
#[derive(Debug, Clone)]
pub struct PredictionsFile {
    path: PathBuf,
}

impl PredictionsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file → empty list.
    pub fn load(&self) -> Result<Vec<Prediction>> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    pub fn save(&self, predictions: &[Prediction]) -> Result<()> {
        write_json_atomic(&self.path, predictions)?;
        Ok(())
    }
}

impl PredictionSink for PredictionsFile {
    fn existing(&self) -> Result<Vec<Prediction>> {
        self.load()
    }

    fn flush(&mut self, all: &[Prediction]) -> Result<()> {
        self.save(all)
    }
}
