//! Rotating NDJSON writer shared by the tasks of one contract run.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use super::package;
use crate::error::WriterError;
use crate::model::OutputFormat;

/// Tunables for a [`StreamWriter`].
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub format: OutputFormat,
    /// A new file is started once the next append would push the current
    /// file past this many bytes.
    pub max_file_bytes: u64,
    /// Bounded wait for the writer lock.
    pub lock_timeout: Duration,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Ndjson,
            max_file_bytes: 200 * 1024 * 1024,
            lock_timeout: Duration::from_secs(30),
        }
    }
}

struct OpenFile {
    path: PathBuf,
    out: BufWriter<File>,
    bytes: u64,
}

impl OpenFile {
    fn create(path: PathBuf) -> Result<Self, WriterError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| WriterError::Io {
                path: path.clone(),
                source: e,
            })?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
            bytes: 0,
        })
    }

    fn write(&mut self, data: &[u8]) -> Result<(), WriterError> {
        self.out.write_all(data).map_err(|e| WriterError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        self.bytes += data.len() as u64;
        Ok(())
    }

    /// Flushes buffered bytes and releases the handle.
    fn finish(self) -> Result<PathBuf, WriterError> {
        let OpenFile { path, out, .. } = self;
        let file = out.into_inner().map_err(|e| WriterError::Io {
            path: path.clone(),
            source: e.into_error(),
        })?;
        file.sync_all().map_err(|e| WriterError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }
}

#[derive(Default)]
struct WriterState {
    counter: u32,
    current: Option<OpenFile>,
    errors: Option<OpenFile>,
    data_files: Vec<PathBuf>,
    error_files: Vec<PathBuf>,
    closed: bool,
}

/// Buffers serialized records into sequentially numbered files
/// (`<prefix>_0001.ndjson`, `<prefix>_0002.ndjson`, ...) and keeps a single
/// `<prefix>_error.ndjson` for error records.
///
/// Files are created lazily, so a writer that never receives data leaves no
/// artifacts behind. All appends go through one lock acquired with a bounded
/// wait; a timeout is reported as [`WriterError::LockTimeout`].
pub struct StreamWriter {
    directory: PathBuf,
    prefix: String,
    settings: WriterSettings,
    state: Mutex<WriterState>,
}

impl StreamWriter {
    pub fn open<P: AsRef<Path>>(
        directory: P,
        prefix: &str,
        settings: WriterSettings,
    ) -> Result<Self, WriterError> {
        let directory = directory.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&directory).map_err(|e| WriterError::Io {
            path: directory.clone(),
            source: e,
        })?;
        if !metadata.is_dir() {
            return Err(WriterError::Io {
                path: directory,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "output location is not a directory",
                ),
            });
        }

        Ok(Self {
            directory,
            prefix: prefix.to_string(),
            settings,
            state: Mutex::new(WriterState::default()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn format(&self) -> OutputFormat {
        self.settings.format
    }

    /// Appends one serialized unit to the current data file, rotating first
    /// if it would not fit.
    pub fn append(&self, data: &[u8]) -> Result<(), WriterError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut state = self.lock()?;
        if state.closed {
            return Err(WriterError::Closed(self.directory.clone()));
        }

        let needs_rotation = state.current.as_ref().is_some_and(|current| {
            current.bytes > 0 && current.bytes + data.len() as u64 > self.settings.max_file_bytes
        });
        if needs_rotation {
            if let Some(full) = state.current.take() {
                let finalized = self.finalize_data_file(full)?;
                state.data_files.push(finalized);
            }
        }

        if state.current.is_none() {
            state.counter += 1;
            let path = self.directory.join(self.data_file_name(state.counter));
            log::debug!("Opening output file {}", path.display());
            state.current = Some(OpenFile::create(path)?);
        }

        match state.current.as_mut() {
            Some(current) => current.write(data),
            None => Err(WriterError::Closed(self.directory.clone())),
        }
    }

    /// Appends error text to the dedicated error file, newline-terminated.
    pub fn append_error(&self, text: &str) -> Result<(), WriterError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(WriterError::Closed(self.directory.clone()));
        }

        if state.errors.is_none() {
            let path = self.directory.join(self.error_file_name());
            state.errors = Some(OpenFile::create(path)?);
        }

        let errors = match state.errors.as_mut() {
            Some(errors) => errors,
            None => return Err(WriterError::Closed(self.directory.clone())),
        };
        errors.write(text.as_bytes())?;
        if !text.ends_with('\n') {
            errors.write(b"\n")?;
        }
        Ok(())
    }

    /// Finalizes open files. Handles are released even if finalizing fails.
    pub fn close(&self) -> Result<(), WriterError> {
        let mut state = self.lock()?;
        self.close_state(&mut state)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Finalized data files, in creation order.
    pub fn data_files(&self) -> Result<Vec<PathBuf>, WriterError> {
        let state = self.lock()?;
        if !state.closed {
            return Err(WriterError::NotClosed);
        }
        Ok(state.data_files.clone())
    }

    /// The error file, if any error was written.
    pub fn error_files(&self) -> Result<Vec<PathBuf>, WriterError> {
        let state = self.lock()?;
        if !state.closed {
            return Err(WriterError::NotClosed);
        }
        Ok(state.error_files.clone())
    }

    pub(crate) fn data_file_name(&self, counter: u32) -> String {
        format!("{}_{:04}.ndjson", self.prefix, counter)
    }

    pub(crate) fn error_file_name(&self) -> String {
        format!("{}_error.ndjson", self.prefix)
    }

    fn lock(&self) -> Result<MutexGuard<'_, WriterState>, WriterError> {
        self.state
            .try_lock_for(self.settings.lock_timeout)
            .ok_or_else(|| WriterError::LockTimeout {
                path: self.directory.clone(),
                waited: self.settings.lock_timeout,
            })
    }

    fn close_state(&self, state: &mut WriterState) -> Result<(), WriterError> {
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let current = state.current.take();
        let errors = state.errors.take();

        let data_result = match current {
            Some(file) => self
                .finalize_data_file(file)
                .map(|path| state.data_files.push(path)),
            None => Ok(()),
        };
        let error_result = match errors {
            Some(file) => file.finish().map(|path| state.error_files.push(path)),
            None => Ok(()),
        };

        data_result.and(error_result)
    }

    fn finalize_data_file(&self, file: OpenFile) -> Result<PathBuf, WriterError> {
        let path = file.finish()?;
        log::debug!("Finalized output file {}", path.display());
        match self.settings.format {
            OutputFormat::Ndjson => Ok(path),
            OutputFormat::Zip => package::zip_and_remove(&path),
        }
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.closed {
            return;
        }
        let mut state = std::mem::take(state);
        if let Err(e) = self.close_state(&mut state) {
            log::warn!(
                "Failed to close writer for {} on drop: {}",
                self.directory.display(),
                e
            );
        }
        *self.state.get_mut() = state;
    }
}
