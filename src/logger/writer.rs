//! Size-rotating file writer
//!
//! The active file is `path`; rotated files are `path.1` (newest) through
//! `path.{max_files}` (oldest). Write failures switch the writer to stderr
//! so a full disk never breaks logging.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

use crate::logger::config::FileConfig;
use crate::logger::error::LoggerError;

#[derive(Clone)]
pub struct RotatingFileWriter {
    state: Arc<Mutex<WriterState>>,
}

struct WriterState {
    path: PathBuf,
    file: BufWriter<File>,
    current_size: u64,
    max_size: u64,
    max_files: usize,
    fallback_mode: bool,
}

impl RotatingFileWriter {
    pub fn new(config: &FileConfig) -> Result<Self, LoggerError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = open_log_file(&config.path, config.append)?;
        let current_size = if config.append {
            fs::metadata(&config.path).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        Ok(Self {
            state: Arc::new(Mutex::new(WriterState {
                path: config.path.clone(),
                file,
                current_size,
                max_size: config.max_size,
                max_files: config.max_files,
                fallback_mode: false,
            })),
        })
    }

    #[cfg(test)]
    fn is_in_fallback_mode(&self) -> bool {
        self.state.lock().map(|s| s.fallback_mode).unwrap_or(false)
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriterGuard {
            state: self.state.clone(),
        }
    }
}

pub struct RotatingWriterGuard {
    state: Arc<Mutex<WriterState>>,
}

impl WriterState {
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let oldest = numbered(&self.path, self.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.max_files).rev() {
            let from = numbered(&self.path, n);
            if from.exists() {
                fs::rename(&from, numbered(&self.path, n + 1))?;
            }
        }
        if self.path.exists() {
            fs::rename(&self.path, numbered(&self.path, 1))?;
        }

        self.file = open_log_file(&self.path, false)?;
        self.current_size = 0;
        Ok(())
    }

    fn fall_back(&mut self, buf: &[u8], error: io::Error) -> io::Result<usize> {
        self.fallback_mode = true;
        eprintln!("[logger] file write failed, falling back to stderr: {}", error);
        io::stderr().write(buf)
    }
}

impl Write for RotatingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;

        if state.fallback_mode {
            return io::stderr().write(buf);
        }

        if state.current_size >= state.max_size {
            if let Err(e) = state.rotate() {
                return state.fall_back(buf, e);
            }
        }

        match state.file.write(buf) {
            Ok(written) => {
                state.current_size += written as u64;
                Ok(written)
            }
            Err(e) => state.fall_back(buf, e),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;

        if state.fallback_mode {
            return io::stderr().flush();
        }
        state.file.flush()
    }
}

impl Drop for RotatingWriterGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            let _ = state.file.flush();
        }
    }
}

fn numbered(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

fn open_log_file(path: &Path, append: bool) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;

    Ok(BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::config::LogFormat;
    use tempfile::TempDir;

    fn file_config(dir: &TempDir, max_size: u64, max_files: usize) -> FileConfig {
        FileConfig {
            enabled: true,
            path: dir.path().join("logs").join("cronwell.log"),
            append: true,
            format: LogFormat::Json,
            max_size,
            max_files,
        }
    }

    fn write_line(writer: &RotatingFileWriter, line: &str) {
        let mut guard = writer.make_writer();
        guard.write_all(line.as_bytes()).unwrap();
        guard.flush().unwrap();
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir, 1024, 2);
        let writer = RotatingFileWriter::new(&config).unwrap();
        write_line(&writer, "hello\n");

        assert_eq!(fs::read_to_string(&config.path).unwrap(), "hello\n");
        assert!(!writer.is_in_fallback_mode());
    }

    #[test]
    fn test_rotates_when_size_reached() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir, 10, 2);
        let writer = RotatingFileWriter::new(&config).unwrap();

        write_line(&writer, "first-line\n");
        write_line(&writer, "second-line\n");
        write_line(&writer, "third-line\n");
        write_line(&writer, "fourth-line\n");

        assert_eq!(fs::read_to_string(&config.path).unwrap(), "fourth-line\n");
        assert_eq!(
            fs::read_to_string(numbered(&config.path, 1)).unwrap(),
            "third-line\n"
        );
        assert_eq!(
            fs::read_to_string(numbered(&config.path, 2)).unwrap(),
            "second-line\n"
        );
        assert!(!numbered(&config.path, 3).exists());
    }

    #[test]
    fn test_append_tracks_existing_size() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir, 8, 1);
        fs::create_dir_all(config.path.parent().unwrap()).unwrap();
        fs::write(&config.path, "0123456789").unwrap();

        let writer = RotatingFileWriter::new(&config).unwrap();
        write_line(&writer, "new\n");

        assert_eq!(fs::read_to_string(&config.path).unwrap(), "new\n");
        assert_eq!(
            fs::read_to_string(numbered(&config.path, 1)).unwrap(),
            "0123456789"
        );
    }
}
