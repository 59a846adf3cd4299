//! Raw byte logging of interface reads and writes

use crate::error::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawDirection {
    Read,
    Write,
}

impl RawDirection {
    fn as_str(&self) -> &'static str {
        match self {
            RawDirection::Read => "read",
            RawDirection::Write => "write",
        }
    }
}

#[derive(Debug)]
struct OpenLog {
    path: PathBuf,
    file: File,
}

/// One log file per start/stop cycle
#[derive(Debug)]
pub struct RawLogger {
    name: String,
    direction: RawDirection,
    dir: PathBuf,
    open: Mutex<Option<OpenLog>>,
}

impl RawLogger {
    pub fn new(name: &str, direction: RawDirection, dir: impl AsRef<Path>) -> Self {
        Self {
            name: name.to_string(),
            direction,
            dir: dir.as_ref().to_path_buf(),
            open: Mutex::new(None),
        }
    }

    pub fn pair(name: &str, dir: impl AsRef<Path>) -> (Self, Self) {
        (
            Self::new(name, RawDirection::Read, dir.as_ref()),
            Self::new(name, RawDirection::Write, dir.as_ref()),
        )
    }

    pub fn logging_enabled(&self) -> bool {
        self.open.lock().is_some()
    }

    pub fn filename(&self) -> Option<PathBuf> {
        self.open.lock().as_ref().map(|l| l.path.clone())
    }

    /// Start a new file, closing any current one
    pub fn start(&self) -> Result<()> {
        let mut open = self.open.lock();
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!(
            "{}_{}_{}.bin",
            Utc::now().format("%Y_%m_%d_%H_%M_%S_%3f"),
            self.name.to_lowercase(),
            self.direction.as_str()
        ));
        let file = File::create(&path)?;
        info!("Raw {} logging started: {}", self.direction.as_str(), path.display());
        *open = Some(OpenLog { path, file });
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(mut log) = self.open.lock().take() {
            if let Err(e) = log.file.flush() {
                error!("Error closing raw log {}: {}", log.path.display(), e);
            }
            info!("Raw {} logging stopped: {}", self.direction.as_str(), log.path.display());
        }
    }

    /// Append bytes if logging; write errors stop logging
    pub fn write(&self, data: &[u8]) {
        let mut open = self.open.lock();
        let failed = match open.as_mut() {
            Some(log) => match log.file.write_all(data) {
                Ok(()) => false,
                Err(e) => {
                    error!("Error writing raw log {}: {}", log.path.display(), e);
                    true
                },
            },
            None => false,
        };
        if failed {
            *open = None;
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_start_write_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (read, write) = RawLogger::pair("INST_INT", dir.path());
        read.write(&[1, 2]);
        assert!(!read.logging_enabled());

        read.start().unwrap();
        write.start().unwrap();
        read.write(&[1, 2, 3]);
        write.write(&[9]);
        let path = read.filename().unwrap();
        assert!(path.to_string_lossy().ends_with("_inst_int_read.bin"));
        read.stop();
        write.stop();

        assert_eq!(fs::read(path).unwrap(), vec![1, 2, 3]);
        assert!(!read.logging_enabled());
    }
}
