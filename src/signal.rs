use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Session state shared with the interrupt handler: the interrupt flag and
/// the temporary capture files that must not outlive the process
#[derive(Clone)]
pub struct SessionContext {
    interrupt_flag: Arc<AtomicBool>,
    temp_files: Arc<Mutex<HashSet<PathBuf>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            interrupt_flag: Arc::new(AtomicBool::new(false)),
            temp_files: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Check if an interrupt has been requested
    pub fn is_interrupted(&self) -> bool {
        self.interrupt_flag.load(Ordering::SeqCst)
    }

    /// Set interrupt state (mainly for testing)
    pub fn set_interrupted(&self, interrupted: bool) {
        self.interrupt_flag.store(interrupted, Ordering::SeqCst);
    }

    /// Track a temporary file until the returned guard is dropped
    pub fn register_temp(&self, path: PathBuf) -> TempFileGuard {
        if let Ok(mut files) = self.temp_files.lock() {
            files.insert(path.clone());
        }
        TempFileGuard {
            path,
            context: self.clone(),
        }
    }

    /// Get a snapshot of currently tracked temporary files
    pub fn active_temp_files(&self) -> Vec<PathBuf> {
        self.temp_files
            .lock()
            .map(|files| files.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Delete every tracked temporary file and clear the registry
    pub fn cleanup_temp_files(&self) -> usize {
        let mut removed = 0;

        for path in self.active_temp_files() {
            if path.exists() && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        if let Ok(mut files) = self.temp_files.lock() {
            files.clear();
        }

        removed
    }

    fn forget(&self, path: &Path) {
        if let Ok(mut files) = self.temp_files.lock() {
            files.remove(path);
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that removes a temporary file from tracking on drop.
///
/// The file itself is owned (and deleted) by whoever created it. After an
/// interrupt the entry stays registered so the handler can delete it.
pub struct TempFileGuard {
    path: PathBuf,
    context: SessionContext,
}

impl TempFileGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.context.is_interrupted() {
            self.context.forget(&self.path);
        }
    }
}

/// Install the Ctrl-C/SIGTERM handler: remove live capture files and exit 130
pub fn install_handler(context: &SessionContext) -> Result<(), ctrlc::Error> {
    let context = context.clone();

    ctrlc::set_handler(move || {
        context.set_interrupted(true);
        eprintln!("\nInterrupted by user. Cleaning up...");
        context.cleanup_temp_files();
        std::process::exit(130);
    })
}
