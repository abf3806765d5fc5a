use crate::error::CleanupError;

/// Summary of one cleanup cycle.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub files_deleted: usize,
    pub jobs_deleted: usize,
    /// Entities left for the next cycle because of shutdown.
    pub skipped: usize,
    /// Errors of single entities; they did not stop the cycle.
    pub errors: Vec<CleanupError>,
}

impl CleanupReport {
    /// Whether every entity was processed without error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
