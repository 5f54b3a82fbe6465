//! Go/no-go for automatic rebases.

use super::queue_entities::{ConflictReport, Recommendation};
use crate::config::{QueueConfig, RebaseConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebaseAdvisor {
    retry_cap: u32,
    max_auto_files: usize,
}

impl RebaseAdvisor {
    pub const fn new(retry_cap: u32, max_auto_files: usize) -> Self {
        Self {
            retry_cap,
            max_auto_files,
        }
    }

    pub const fn from_config(queue: &QueueConfig, rebase: &RebaseConfig) -> Self {
        Self::new(queue.retry_cap, rebase.max_auto_files)
    }

    pub const fn retry_cap(&self) -> u32 {
        self.retry_cap
    }

    /// Recommendation for a conflict seen after `retry_count` rebases.
    ///
    /// Once the cap is reached the answer is always `Manual`, whatever the
    /// conflict shape.
    #[must_use]
    pub fn advise(&self, report: &ConflictReport, retry_count: u32) -> Recommendation {
        if report.is_clean() {
            Recommendation::None
        } else if retry_count >= self.retry_cap {
            Recommendation::Manual
        } else if report.files.len() <= self.max_auto_files {
            Recommendation::AutoRebase
        } else {
            Recommendation::Manual
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflicts(n: usize) -> ConflictReport {
        ConflictReport::with_files((0..n).map(|i| format!("src/file_{i}.rs")).collect())
    }

    #[test]
    fn test_clean_report_needs_nothing() {
        let advisor = RebaseAdvisor::new(3, 5);
        assert_eq!(advisor.advise(&ConflictReport::clean(), 0), Recommendation::None);
    }

    #[test]
    fn test_small_conflict_gets_auto_rebase() {
        let advisor = RebaseAdvisor::new(3, 5);
        assert_eq!(advisor.advise(&conflicts(1), 0), Recommendation::AutoRebase);
        assert_eq!(advisor.advise(&conflicts(5), 2), Recommendation::AutoRebase);
    }

    #[test]
    fn test_wide_conflict_goes_manual() {
        let advisor = RebaseAdvisor::new(3, 5);
        assert_eq!(advisor.advise(&conflicts(6), 0), Recommendation::Manual);
    }

    #[test]
    fn test_retry_cap_forces_manual() {
        let advisor = RebaseAdvisor::new(3, 5);
        assert_eq!(advisor.advise(&conflicts(1), 3), Recommendation::Manual);
        assert_eq!(advisor.advise(&conflicts(1), 10), Recommendation::Manual);
    }

    #[test]
    fn test_zero_cap_never_rebases() {
        let advisor = RebaseAdvisor::new(0, 5);
        assert_eq!(advisor.advise(&conflicts(1), 0), Recommendation::Manual);
    }
}
