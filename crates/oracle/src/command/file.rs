use std::path::{Path, PathBuf};
use std::time::Duration;

/// Read a whole file. Relative paths resolve against the oracle root directory.
#[derive(Debug, Clone)]
pub struct ReadFileCommand {
    path: PathBuf,
}

impl ReadFileCommand {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Timer: completes with a timeout message after the delay.
#[derive(Debug, Clone)]
pub struct SleepCommand {
    delay_ms: u64,
}

impl SleepCommand {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }
}

/// Parse a DICOM file from disk.
#[derive(Debug, Clone)]
pub struct ParseDicomFromFileCommand {
    path: PathBuf,
    pixel_data_included: bool,
}

impl ParseDicomFromFileCommand {
    pub fn new(path: impl Into<PathBuf>, pixel_data_included: bool) -> Self {
        Self {
            path: path.into(),
            pixel_data_included,
        }
    }

    /// File referenced from a DICOMDIR, resolved next to the DICOMDIR itself.
    pub fn from_dicomdir(dicomdir: &Path, referenced_file: &str, pixel_data_included: bool) -> Self {
        let mut path = dicomdir.parent().map(Path::to_path_buf).unwrap_or_default();
        for component in referenced_file.split(['\\', '/']).filter(|c| !c.is_empty()) {
            path.push(component);
        }
        Self::new(path, pixel_data_included)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_pixel_data_included(&self) -> bool {
        self.pixel_data_included
    }
}
