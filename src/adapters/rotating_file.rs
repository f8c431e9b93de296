//! Size-rotated log file for the `tracing` JSON layer.
//!
//! When a write would push the active file past `max_size_bytes` it is renamed
//! to `<stem>-<timestamp>.<ext>` next to it and a fresh file is opened. Backups
//! older than `max_age` are deleted on each rotation.
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime},
};

use tracing_subscriber::fmt::MakeWriter;

use crate::config::models::FileLogConfig;

const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_size: u64,
    max_age: Duration,
}

impl RotatingFile {
    fn open(path: PathBuf, max_size: u64, max_age: Duration) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            written,
            max_size,
            max_age,
        })
    }

    fn stem_and_extension(&self) -> (String, Option<String>) {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = self
            .path
            .extension()
            .map(|s| s.to_string_lossy().into_owned());
        (stem, extension)
    }

    fn backup_path(&self) -> PathBuf {
        let (stem, extension) = self.stem_and_extension();
        let timestamp = chrono::Local::now().format(BACKUP_TIMESTAMP_FORMAT);
        let dir = self.path.parent().unwrap_or_else(|| Path::new(""));

        let name_for = |suffix: Option<u32>| {
            let base = match suffix {
                Some(n) => format!("{stem}-{timestamp}.{n}"),
                None => format!("{stem}-{timestamp}"),
            };
            match &extension {
                Some(ext) => dir.join(format!("{base}.{ext}")),
                None => dir.join(base),
            }
        };

        let mut candidate = name_for(None);
        let mut n = 1;
        while candidate.exists() {
            candidate = name_for(Some(n));
            n += 1;
        }
        candidate
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        fs::rename(&self.path, self.backup_path())?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        self.remove_expired_backups()
    }

    fn is_backup(&self, candidate: &Path) -> bool {
        if candidate == self.path {
            return false;
        }
        let (stem, extension) = self.stem_and_extension();
        let Some(name) = candidate.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        let ext_matches = match &extension {
            Some(ext) => name.ends_with(&format!(".{ext}")),
            None => true,
        };
        name.starts_with(&format!("{stem}-")) && ext_matches
    }

    fn remove_expired_backups(&self) -> io::Result<()> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };
        let now = SystemTime::now();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !self.is_backup(&path) {
                continue;
            }
            let modified = fs::metadata(&path)?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= self.max_age {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Shared handle to a rotating log file, usable as a `tracing` writer.
#[derive(Clone)]
pub struct RotatingFileWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl RotatingFileWriter {
    pub fn new(path: impl Into<PathBuf>, max_size_bytes: u64, max_age: Duration) -> io::Result<Self> {
        let file = RotatingFile::open(path.into(), max_size_bytes, max_age)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }

    pub fn from_config(config: &FileLogConfig) -> io::Result<Self> {
        Self::new(
            &config.path,
            config.max_size_bytes,
            Duration::from_secs(config.max_age_days * SECONDS_PER_DAY),
        )
    }

    fn lock(&self) -> MutexGuard<'_, RotatingFile> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive access to the file for the duration of one event.
pub struct RotatingFileGuard<'a>(MutexGuard<'a, RotatingFile>);

impl Write for RotatingFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingFileGuard(self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backups(dir: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.file_name().unwrap() != "main.log")
            .collect();
        found.sort();
        found
    }

    #[test]
    fn test_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/main.log");
        let writer = RotatingFileWriter::new(&path, 1024, Duration::from_secs(60)).unwrap();
        writer.make_writer().write_all(b"hello\n").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "hello\n");
    }

    #[test]
    fn test_rotates_when_size_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.log");
        let writer =
            RotatingFileWriter::new(&path, 10, Duration::from_secs(30 * SECONDS_PER_DAY)).unwrap();

        writer.make_writer().write_all(b"0123456789").unwrap();
        writer.make_writer().write_all(b"abc").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "abc");
        let rotated = backups(dir.path());
        assert_eq!(rotated.len(), 1);
        assert_eq!(fs::read_to_string(&rotated[0]).unwrap(), "0123456789");
        let name = rotated[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("main-"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_oversized_single_write_goes_to_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.log");
        let writer = RotatingFileWriter::new(&path, 4, Duration::from_secs(60)).unwrap();

        writer.make_writer().write_all(b"longer than four").unwrap();
        assert!(backups(dir.path()).is_empty());
    }

    #[test]
    fn test_expired_backups_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.log");
        let unrelated = dir.path().join("other.txt");
        fs::write(&unrelated, "keep").unwrap();

        let writer = RotatingFileWriter::new(&path, 5, Duration::ZERO).unwrap();
        writer.make_writer().write_all(b"first").unwrap();
        writer.make_writer().write_all(b"second").unwrap();

        assert_eq!(backups(dir.path()), vec![unrelated]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn test_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileLogConfig {
            path: dir.path().join("app.log").to_string_lossy().into_owned(),
            ..FileLogConfig::default()
        };
        assert!(RotatingFileWriter::from_config(&config).is_ok());
    }
}
