use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckCategory {
    ForeignKeys,
    RecordCounts,
    DataQuality,
}

/// Outcome of one validation rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub category: CheckCategory,
    pub passed: bool,
    /// Total offending records, which may exceed `offending_ids.len()`.
    pub offending_count: i64,
    /// Identifiers of offending records, capped at the report limit.
    pub offending_ids: Vec<String>,
    pub explanation: String,
}

impl CheckResult {
    pub fn pass(category: CheckCategory, name: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category,
            passed: true,
            offending_count: 0,
            offending_ids: Vec::new(),
            explanation: explanation.into(),
        }
    }

    pub fn fail(
        category: CheckCategory,
        name: impl Into<String>,
        offending_count: i64,
        offending_ids: Vec<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            passed: false,
            offending_count,
            offending_ids,
            explanation: explanation.into(),
        }
    }

    /// A check that could not run counts as failed.
    pub fn errored(category: CheckCategory, name: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::fail(category, name, 0, Vec::new(), format!("check could not run: {error}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryReport {
    pub category: CheckCategory,
    pub passed: bool,
    pub checks: Vec<CheckResult>,
}

impl CategoryReport {
    pub fn new(category: CheckCategory, checks: Vec<CheckResult>) -> Self {
        Self {
            category,
            passed: checks.iter().all(|c| c.passed),
            checks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub passed: bool,
    pub total_checks: usize,
    pub failed_checks: usize,
    pub categories: Vec<CategoryReport>,
    pub generated_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn from_categories(categories: Vec<CategoryReport>) -> Self {
        let total_checks = categories.iter().map(|c| c.checks.len()).sum();
        let failed_checks = categories
            .iter()
            .flat_map(|c| c.checks.iter())
            .filter(|c| !c.passed)
            .count();

        Self {
            passed: failed_checks == 0,
            total_checks,
            failed_checks,
            categories,
            generated_at: Utc::now(),
        }
    }

    pub fn category(&self, category: CheckCategory) -> Option<&CategoryReport> {
        self.categories.iter().find(|c| c.category == category)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.categories
            .iter()
            .flat_map(|c| c.checks.iter())
            .filter(|c| !c.passed)
    }
}
