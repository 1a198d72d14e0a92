//! Feature inputs, run results, and agent-output interpretation.

use crate::phase::TddCycle;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Length of the hash suffix in derived feature ids.
const FEATURE_ID_HASH_LEN: usize = 12;

// ============================================================================
// Features
// ============================================================================

/// A unit of work driven through one or more TDD cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TddFeature {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub test_criteria: Vec<String>,
}

impl TddFeature {
    /// Feature with an id derived from the description.
    pub fn new(description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            id: derive_feature_id(&description),
            description,
            test_criteria: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.test_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }
}

impl From<&str> for TddFeature {
    fn from(description: &str) -> Self {
        Self::new(description)
    }
}

impl From<String> for TddFeature {
    fn from(description: String) -> Self {
        Self::new(description)
    }
}

/// Stable id for a description: `feature-` plus a short SHA-256 prefix.
#[must_use]
pub fn derive_feature_id(description: &str) -> String {
    let digest = Sha256::digest(description.trim().as_bytes());
    let hash = hex::encode(digest);
    format!("feature-{}", &hash[..FEATURE_ID_HASH_LEN])
}

// ============================================================================
// Results
// ============================================================================

/// Final outcome of driving one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureResult {
    pub feature_id: String,
    pub feature_description: String,
    pub success: bool,
    /// Every cycle run for the feature, oldest first.
    pub cycles: Vec<TddCycle>,
    pub final_tests: Option<String>,
    pub final_code: Option<String>,
    /// Unrecovered errors; empty on success.
    pub errors: Vec<String>,
    pub total_duration_seconds: f64,
}

impl FeatureResult {
    /// Sum of attempt numbers over every phase of every cycle.
    #[must_use]
    pub fn get_total_attempts(&self) -> u32 {
        self.cycles.iter().map(TddCycle::total_attempts).sum()
    }

    /// Retries used across all cycles.
    #[must_use]
    pub fn total_retries(&self) -> u32 {
        self.cycles.iter().map(TddCycle::total_retries).sum()
    }

    /// The last cycle run.
    #[must_use]
    pub fn final_cycle(&self) -> Option<&TddCycle> {
        self.cycles.last()
    }
}

// ============================================================================
// Test output parsing
// ============================================================================

static PASSED_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+passed").ok());
static FAILED_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+failed").ok());

/// Pass/fail counts read from executor output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub all_passed: bool,
}

impl TestResults {
    /// Returns true when no counts were recognised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passed_tests == 0 && self.failed_tests == 0
    }

    /// Total tests counted.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.passed_tests.saturating_add(self.failed_tests)
    }
}

/// First captured count, saturating at `u32::MAX`.
fn first_count(re: &Option<Regex>, text: &str) -> u32 {
    re.as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        // `\d+` only fails to parse on overflow
        .map_or(0, |m| m.as_str().parse().unwrap_or(u32::MAX))
}

/// Read `"<N> passed"` and `"<M> failed"` anywhere in `raw_output`.
///
/// Unparseable output yields zero counts and `all_passed == false`.
#[must_use]
pub fn parse_test_results(raw_output: &str) -> TestResults {
    let passed_tests = first_count(&PASSED_RE, raw_output);
    let failed_tests = first_count(&FAILED_RE, raw_output);
    TestResults {
        passed_tests,
        failed_tests,
        all_passed: failed_tests == 0 && passed_tests > 0,
    }
}

// ============================================================================
// Review verdicts
// ============================================================================

const REJECTION_KEYWORDS: &[&str] = &[
    "reject",
    "changes requested",
    "request changes",
    "not approved",
];
const APPROVAL_KEYWORDS: &[&str] = &["approve", "lgtm"];

/// Reviewer decision read from free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    Rejected,
}

impl ReviewVerdict {
    /// Rejection keywords win over approval keywords; anything else is a
    /// rejection.
    #[must_use]
    pub fn parse(review: &str) -> Self {
        let lower = review.to_lowercase();
        if REJECTION_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Self::Rejected
        } else if APPROVAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Self::Approved
        } else {
            Self::Rejected
        }
    }

    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_passing() {
        let results = parse_test_results("5 passed, 0 failed");
        assert_eq!(results.passed_tests, 5);
        assert_eq!(results.failed_tests, 0);
        assert!(results.all_passed);
        assert_eq!(results.total(), 5);
    }

    #[test]
    fn test_parse_some_failing() {
        let results = parse_test_results("3 passed, 2 failed");
        assert_eq!(results.passed_tests, 3);
        assert_eq!(results.failed_tests, 2);
        assert!(!results.all_passed);
    }

    #[test]
    fn test_parse_garbage() {
        let results = parse_test_results("garbage");
        assert_eq!(results, TestResults::default());
        assert!(results.is_empty());
    }

    #[test]
    fn test_parse_is_case_insensitive_and_tolerant() {
        let results = parse_test_results("===== 1 FAILED, 12 Passed in 0.31s =====");
        assert_eq!(results.passed_tests, 12);
        assert_eq!(results.failed_tests, 1);
        assert!(!results.all_passed);
    }

    #[test]
    fn test_parse_only_passed() {
        assert!(parse_test_results("ok: 4 passed").all_passed);
        assert!(!parse_test_results("0 passed").all_passed);
        assert!(!parse_test_results("2 failed").all_passed);
    }

    #[test]
    fn test_parse_saturates_huge_counts() {
        let results = parse_test_results("4294967296 passed, 0 failed");
        assert_eq!(results.passed_tests, u32::MAX);
        assert!(results.all_passed);

        let results = parse_test_results("4294967295 passed, 1 failed");
        assert_eq!(results.total(), u32::MAX);
        assert!(!results.all_passed);
    }

    #[test]
    fn test_derive_feature_id_is_stable() {
        let a = derive_feature_id("adds two numbers");
        let b = derive_feature_id("  adds two numbers ");
        assert_eq!(a, b);
        assert!(a.starts_with("feature-"));
        assert_eq!(a.len(), "feature-".len() + FEATURE_ID_HASH_LEN);
        assert_ne!(a, derive_feature_id("subtracts two numbers"));
    }

    #[test]
    fn test_feature_from_str() {
        let feature: TddFeature = "parse dates".into();
        assert_eq!(feature.description, "parse dates");
        assert_eq!(feature.id, derive_feature_id("parse dates"));

        let feature = TddFeature::from(String::from("x"))
            .with_id("custom")
            .with_criteria(["handles leap years"]);
        assert_eq!(feature.id, "custom");
        assert_eq!(feature.test_criteria, vec!["handles leap years"]);
    }

    #[test]
    fn test_review_verdicts() {
        assert_eq!(ReviewVerdict::parse("LGTM"), ReviewVerdict::Approved);
        assert_eq!(
            ReviewVerdict::parse("Approved, nice work"),
            ReviewVerdict::Approved
        );
        assert_eq!(
            ReviewVerdict::parse("Not approved: missing tests"),
            ReviewVerdict::Rejected
        );
        assert_eq!(ReviewVerdict::parse("Changes requested"), ReviewVerdict::Rejected);
        assert_eq!(ReviewVerdict::parse("hmm"), ReviewVerdict::Rejected);
        assert!(!ReviewVerdict::parse("").is_approved());
    }

    #[test]
    fn test_feature_result_totals() {
        let result = FeatureResult {
            feature_id: "f".into(),
            feature_description: "d".into(),
            success: true,
            cycles: Vec::new(),
            final_tests: None,
            final_code: None,
            errors: Vec::new(),
            total_duration_seconds: 0.0,
        };
        assert_eq!(result.get_total_attempts(), 0);
        assert!(result.final_cycle().is_none());
    }
}
