//! Userspace detector programs.
//!
//! A detector is run with the candidate file as its only argument. Exit
//! status zero means "this format handles the file"; anything else,
//! including failing to start the program at all, means it does not.

use std::path::Path;
use std::process::Command;

use tracing::debug;

/// Decides whether a detector accepts a file.
pub trait DetectorRunner {
    fn accepts(&self, detector: &str, target: &Path) -> bool;
}

/// Runs detectors as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessDetector;

impl DetectorRunner for ProcessDetector {
    fn accepts(&self, detector: &str, target: &Path) -> bool {
        match Command::new(detector).arg(target).status() {
            Ok(status) => {
                debug!(detector, target = %target.display(), %status, "Detector finished");
                status.success()
            }
            Err(e) => {
                debug!(detector, error = %e, "Unable to run detector");
                false
            }
        }
    }
}

impl<F> DetectorRunner for F
where
    F: Fn(&str, &Path) -> bool,
{
    fn accepts(&self, detector: &str, target: &Path) -> bool {
        self(detector, target)
    }
}
