//! Diagnostic artifacts for unexpected connection errors
//!
//! Each distinct message produces at most one artifact per process. Connect
//! failures and lost connections are tracked separately.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    ConnectFailed,
    ConnectionLost,
}

impl DiagnosticKind {
    fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::ConnectFailed => "connection_failed",
            DiagnosticKind::ConnectionLost => "connection_lost",
        }
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    dir: Option<PathBuf>,
    connect_seen: Mutex<HashSet<String>>,
    lost_seen: Mutex<HashSet<String>>,
}

impl Diagnostics {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            ..Default::default()
        }
    }

    /// Record one unexpected error; `None` when already seen
    pub fn record(&self, kind: DiagnosticKind, interface: &str, message: &str) -> Option<PathBuf> {
        let seen = match kind {
            DiagnosticKind::ConnectFailed => &self.connect_seen,
            DiagnosticKind::ConnectionLost => &self.lost_seen,
        };
        if !seen.lock().insert(message.to_string()) {
            return None;
        }
        let dir = self.dir.as_ref()?;
        let now = Utc::now();
        let path = dir.join(format!(
            "{}_{}_{}.txt",
            now.format("%Y%m%d%H%M%S%3f"),
            interface.to_lowercase(),
            kind.as_str()
        ));
        let body = format!(
            "{} {}\n{}\n{}\n",
            interface,
            kind.as_str(),
            now.to_rfc3339(),
            message
        );
        if let Err(e) = fs::create_dir_all(dir).and_then(|_| fs::write(&path, body)) {
            warn!("Unable to write diagnostic {}: {}", path.display(), e);
            return None;
        }
        error!("{}: diagnostic written to {}", interface, path.display());
        Some(path)
    }

    pub fn seen(&self, kind: DiagnosticKind) -> usize {
        match kind {
            DiagnosticKind::ConnectFailed => self.connect_seen.lock().len(),
            DiagnosticKind::ConnectionLost => self.lost_seen.lock().len(),
        }
    }
}
