//! Structured run reports.
//!
//! Both the collector and the URL monitor return a report object instead of
//! logging-and-forgetting; the caller decides whether to print, persist or
//! alert on it.

use serde::{Deserialize, Serialize};

/// Reports keep at most this many detailed error entries; counters are
/// always exact.
pub const MAX_REPORTED_ERRORS: usize = 50;

/// How a single collection item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Success,
    FetchFailed,
    ExtractionFailed,
    StoreFailed,
}

/// One failed item: which URL, how it failed, and the error text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    pub url: String,
    pub outcome: ItemOutcome,
    pub error: String,
}

/// Summary of one collection run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Items stored with an undetermined SKU. Counted inside `successful`
    /// but surfaced separately: they risk duplicate identities.
    pub ambiguous: usize,
    pub errors: Vec<ItemError>,
}

impl CollectionReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record_success(&mut self, ambiguous_sku: bool) {
        self.successful += 1;
        if ambiguous_sku {
            self.ambiguous += 1;
        }
    }

    pub fn record_failure(&mut self, url: &str, outcome: ItemOutcome, error: String) {
        self.failed += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(ItemError {
                url: url.to_string(),
                outcome,
                error,
            });
        }
    }
}

/// What the URL health checker found for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlIssueKind {
    Redirect,
    NotFound,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlIssue {
    pub product_id: i64,
    pub product_name: String,
    pub sku: String,
    pub kind: UrlIssueKind,
    pub detail: String,
}

/// Summary of one URL health-check run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub total: usize,
    pub active: usize,
    pub redirected: usize,
    pub not_found: usize,
    pub errors: usize,
    pub issues: Vec<UrlIssue>,
}

impl HealthReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record_issue(&mut self, issue: UrlIssue) {
        match issue.kind {
            UrlIssueKind::Redirect => self.redirected += 1,
            UrlIssueKind::NotFound => self.not_found += 1,
            UrlIssueKind::Error => self.errors += 1,
        }
        if self.issues.len() < MAX_REPORTED_ERRORS {
            self.issues.push(issue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_list_is_bounded_but_counters_are_exact() {
        let mut report = CollectionReport::new(100);
        for i in 0..MAX_REPORTED_ERRORS + 10 {
            report.record_failure(
                &format!("https://example.com/{i}"),
                ItemOutcome::FetchFailed,
                "fetch failed".into(),
            );
        }
        assert_eq!(report.failed, MAX_REPORTED_ERRORS + 10);
        assert_eq!(report.errors.len(), MAX_REPORTED_ERRORS);
    }

    #[test]
    fn ambiguous_is_a_subset_of_successful() {
        let mut report = CollectionReport::new(3);
        report.record_success(false);
        report.record_success(true);
        report.record_success(true);
        assert_eq!(report.successful, 3);
        assert_eq!(report.ambiguous, 2);
        assert_eq!(report.failed, 0);
    }
}
