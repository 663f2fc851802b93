//! Post-load validation
//!
//! Read-only checks against the loaded people database, grouped in three
//! categories: declared foreign keys, expected record counts and a fixed set
//! of data-quality rules. Every check produces its own `CheckResult`; a check
//! whose query fails is reported as failed rather than aborting the run.

use chrono::{Datelike, NaiveDate, Utc};
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::db::{queries, schema};
use crate::models::validation::{CategoryReport, CheckCategory, CheckResult, ValidationReport};
use crate::services::cancel::{CancellationToken, Interrupt};
use crate::services::plan::ImportPlan;

/// Earliest plausible date in the people database.
const EARLIEST_DATE: (i32, u32, u32) = (1600, 1, 1);

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Validation interrupted: {0}")]
    Interrupted(#[from] Interrupt),
}

/// One data-quality rule: rows of `table` matching `predicate` are offenders.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityRule {
    pub name: String,
    pub table: &'static str,
    pub predicate: String,
    pub explanation: String,
}

/// Plausible calendar range for date columns.
pub fn date_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let (y, m, d) = EARLIEST_DATE;
    let min = NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN);
    let max = today
        .with_year(today.year() + 1)
        .unwrap_or(today);
    (min, max)
}

fn out_of_range(column: &str, min: NaiveDate, max: NaiveDate) -> String {
    format!("({column} < DATE '{min}' OR {column} > DATE '{max}')")
}

/// The fixed rule set, limited to tables present in the plan.
pub fn quality_rules(plan: &ImportPlan, today: NaiveDate) -> Vec<QualityRule> {
    let (min, max) = date_bounds(today);

    let mut rules = vec![
        QualityRule {
            name: "person_name_present".to_string(),
            table: "people_db_person",
            predicate: "(name_first IS NULL OR btrim(name_first) = '') \
                        AND (name_last IS NULL OR btrim(name_last) = '')"
                .to_string(),
            explanation: "people without a first or last name".to_string(),
        },
        QualityRule {
            name: "school_name_present".to_string(),
            table: "people_db_school",
            predicate: "name IS NULL OR btrim(name) = ''".to_string(),
            explanation: "schools without a name".to_string(),
        },
        QualityRule {
            name: "position_has_dates".to_string(),
            table: "people_db_position",
            predicate: "date_start IS NULL AND date_termination IS NULL".to_string(),
            explanation: "positions without start or termination dates".to_string(),
        },
        QualityRule {
            name: "person_dates_in_range".to_string(),
            table: "people_db_person",
            predicate: format!(
                "{} OR {}",
                out_of_range("date_dob", min, max),
                out_of_range("date_dod", min, max)
            ),
            explanation: format!("people with birth or death dates outside {min}..{max}"),
        },
        QualityRule {
            name: "position_dates_in_range".to_string(),
            table: "people_db_position",
            predicate: format!(
                "{} OR {}",
                out_of_range("date_start", min, max),
                out_of_range("date_termination", min, max)
            ),
            explanation: format!("positions with dates outside {min}..{max}"),
        },
        QualityRule {
            name: "court_dates_in_range".to_string(),
            table: "people_db_court",
            predicate: format!(
                "{} OR {}",
                out_of_range("start_date", min, max),
                out_of_range("end_date", min, max)
            ),
            explanation: format!("courts with start or end dates outside {min}..{max}"),
        },
        QualityRule {
            name: "education_dates_in_range".to_string(),
            table: "people_db_education",
            predicate: format!(
                "{} OR {}",
                out_of_range("date_start", min, max),
                out_of_range("date_end", min, max)
            ),
            explanation: format!("education records with dates outside {min}..{max}"),
        },
        QualityRule {
            name: "politicalaffiliation_dates_in_range".to_string(),
            table: "people_db_politicalaffiliation",
            predicate: format!(
                "{} OR {}",
                out_of_range("date_start", min, max),
                out_of_range("date_end", min, max)
            ),
            explanation: format!("political affiliations with dates outside {min}..{max}"),
        },
        QualityRule {
            name: "position_terminates_after_start".to_string(),
            table: "people_db_position",
            predicate: "date_start IS NOT NULL AND date_termination IS NOT NULL \
                        AND date_termination < date_start"
                .to_string(),
            explanation: "positions terminating before they start".to_string(),
        },
    ];

    for table in plan.tables().iter().filter(|t| t.integer_id) {
        rules.push(QualityRule {
            name: format!("{}_ids_non_negative", table.name),
            table: table.name,
            predicate: "id < 0".to_string(),
            explanation: format!("negative identifiers in {}", table.name),
        });
    }

    rules.retain(|rule| plan.get(rule.table).is_some());
    rules
}

/// Compare one actual row count against its expectation.
pub fn compare_count(table: &str, expected: i64, actual: i64) -> CheckResult {
    let name = format!("{table}_record_count");
    if expected == actual {
        CheckResult::pass(
            CheckCategory::RecordCounts,
            name,
            format!("{table} has the expected {actual} rows"),
        )
    } else {
        let delta = actual - expected;
        CheckResult::fail(
            CheckCategory::RecordCounts,
            name,
            delta.abs(),
            Vec::new(),
            format!("{table}: expected {expected} rows, found {actual} (delta {delta:+})"),
        )
    }
}

pub struct Validator {
    pool: PgPool,
    plan: ImportPlan,
    report_limit: i64,
}

impl Validator {
    pub fn new(pool: PgPool, plan: ImportPlan, report_limit: i64) -> Self {
        Self {
            pool,
            plan,
            report_limit: report_limit.max(1),
        }
    }

    /// Orphan check for every declared single-column foreign key between plan tables.
    pub async fn validate_foreign_keys(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<CheckResult>, ValidationError> {
        let category = CheckCategory::ForeignKeys;
        let foreign_keys = match schema::foreign_keys(&self.pool).await {
            Ok(fks) => fks,
            Err(e) => {
                tracing::warn!(error = %e, "Foreign key introspection failed");
                return Ok(vec![CheckResult::errored(category, "foreign_key_introspection", e)]);
            }
        };

        let mut checks = Vec::new();
        for fk in foreign_keys
            .iter()
            .filter(|fk| self.plan.get(&fk.table).is_some())
        {
            cancel.check()?;

            let name = format!("{}.{}", fk.table, fk.column);
            let sql = format!(
                r#"
                SELECT t.id::text, COUNT(*) OVER ()
                FROM {table} t
                WHERE t.{column} IS NOT NULL
                  AND NOT EXISTS (
                      SELECT 1 FROM {ref_table} r WHERE r.{ref_column} = t.{column}
                  )
                ORDER BY t.id
                LIMIT $1
                "#,
                table = schema::quote_ident(&fk.table),
                column = schema::quote_ident(&fk.column),
                ref_table = schema::quote_ident(&fk.ref_table),
                ref_column = schema::quote_ident(&fk.ref_column),
            );

            let check = match self.offenders(&sql).await {
                Ok((0, _)) => CheckResult::pass(
                    category,
                    name,
                    format!("every {} references an existing {}", fk.column, fk.ref_table),
                ),
                Ok((count, ids)) => CheckResult::fail(
                    category,
                    name,
                    count,
                    ids,
                    format!(
                        "{count} rows of {} reference missing {}.{} ({})",
                        fk.table, fk.ref_table, fk.ref_column, fk.constraint
                    ),
                ),
                Err(e) => CheckResult::errored(category, name, e),
            };
            checks.push(check);
        }

        Ok(checks)
    }

    /// Exact-match comparison of actual row counts with the expected ones.
    pub async fn validate_record_counts(
        &self,
        expected: &BTreeMap<String, i64>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CheckResult>, ValidationError> {
        let mut checks = Vec::new();
        for (table, expected) in expected {
            cancel.check()?;

            let check = if self.plan.get(table).is_none() {
                CheckResult::errored(
                    CheckCategory::RecordCounts,
                    format!("{table}_record_count"),
                    format!("{table} is not a people database table"),
                )
            } else {
                match queries::count_rows(&self.pool, table).await {
                    Ok(actual) => compare_count(table, *expected, actual),
                    Err(e) => CheckResult::errored(
                        CheckCategory::RecordCounts,
                        format!("{table}_record_count"),
                        e,
                    ),
                }
            };
            checks.push(check);
        }
        Ok(checks)
    }

    pub async fn validate_data_quality(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<CheckResult>, ValidationError> {
        let category = CheckCategory::DataQuality;
        let mut checks = Vec::new();

        for rule in quality_rules(&self.plan, Utc::now().date_naive()) {
            cancel.check()?;

            let sql = format!(
                "SELECT id::text, COUNT(*) OVER () FROM {} WHERE {} ORDER BY id LIMIT $1",
                schema::quote_ident(rule.table),
                rule.predicate
            );

            let check = match self.offenders(&sql).await {
                Ok((0, _)) => CheckResult::pass(category, rule.name, format!("no {}", rule.explanation)),
                Ok((count, ids)) => CheckResult::fail(
                    category,
                    rule.name,
                    count,
                    ids,
                    format!("{count} {}", rule.explanation),
                ),
                Err(e) => CheckResult::errored(category, rule.name, e),
            };
            checks.push(check);
        }

        Ok(checks)
    }

    /// Run every category concurrently and combine them into one report.
    ///
    /// Failed checks never stop the other categories. Record counts are only
    /// checked when expectations are supplied.
    pub async fn run_full(
        &self,
        expected: Option<&BTreeMap<String, i64>>,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, ValidationError> {
        let empty = BTreeMap::new();
        let (foreign_keys, counts, quality) = tokio::join!(
            self.validate_foreign_keys(cancel),
            self.validate_record_counts(expected.unwrap_or(&empty), cancel),
            self.validate_data_quality(cancel),
        );

        let report = ValidationReport::from_categories(vec![
            CategoryReport::new(CheckCategory::ForeignKeys, foreign_keys?),
            CategoryReport::new(CheckCategory::RecordCounts, counts?),
            CategoryReport::new(CheckCategory::DataQuality, quality?),
        ]);

        if report.passed {
            tracing::info!(checks = report.total_checks, "Validation passed");
        } else {
            tracing::warn!(
                checks = report.total_checks,
                failed = report.failed_checks,
                "Validation found problems"
            );
        }

        Ok(report)
    }

    /// Total offending rows and the first `report_limit` of their ids.
    async fn offenders(&self, sql: &str) -> Result<(i64, Vec<String>), sqlx::Error> {
        let rows: Vec<(String, i64)> = sqlx::query_as(sql)
            .bind(self.report_limit)
            .fetch_all(&self.pool)
            .await?;

        let count = rows.first().map_or(0, |(_, total)| *total);
        Ok((count, rows.into_iter().map(|(id, _)| id).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::plan::PEOPLE_DB_TABLES;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 31).unwrap()
    }

    #[test]
    fn test_date_bounds() {
        let (min, max) = date_bounds(today());
        assert_eq!(min, NaiveDate::from_ymd_opt(1600, 1, 1).unwrap());
        assert_eq!(max, NaiveDate::from_ymd_opt(2025, 10, 31).unwrap());
    }

    #[test]
    fn test_quality_rules_cover_names_dates_and_ids() {
        let rules = quality_rules(&ImportPlan::people_db(), today());
        let names: Vec<_> = rules.iter().map(|r| r.name.as_str()).collect();

        assert!(names.contains(&"person_name_present"));
        assert!(names.contains(&"position_dates_in_range"));
        assert!(names.contains(&"position_terminates_after_start"));
        assert!(names.contains(&"position_has_dates"));
        assert!(!names.contains(&"education_has_school"));
        assert!(names.contains(&"people_db_person_ids_non_negative"));
        assert!(!names.contains(&"people_db_court_ids_non_negative"));

        let dates = rules.iter().find(|r| r.name == "person_dates_in_range").unwrap();
        assert!(dates.predicate.contains("DATE '1600-01-01'"));
        assert!(dates.predicate.contains("DATE '2025-10-31'"));
    }

    #[test]
    fn test_every_dated_table_has_a_range_rule() {
        let rules = quality_rules(&ImportPlan::people_db(), today());
        let range_rule = |table: &str| {
            rules
                .iter()
                .find(|r| r.table == table && r.name.ends_with("_dates_in_range"))
                .unwrap_or_else(|| panic!("no date range rule for {table}"))
        };

        let court = range_rule("people_db_court");
        assert!(court.predicate.contains("start_date < DATE '1600-01-01'"));
        assert!(court.predicate.contains("end_date > DATE '2025-10-31'"));

        for table in ["people_db_education", "people_db_politicalaffiliation"] {
            let rule = range_rule(table);
            assert!(rule.predicate.contains("date_start < DATE '1600-01-01'"));
            assert!(rule.predicate.contains("date_end > DATE '2025-10-31'"));
        }

        range_rule("people_db_person");
        range_rule("people_db_position");
    }

    #[test]
    fn test_quality_rules_follow_the_plan() {
        let plan = ImportPlan::new(vec![PEOPLE_DB_TABLES[0], PEOPLE_DB_TABLES[2]]).unwrap();
        let rules = quality_rules(&plan, today());
        let names: Vec<_> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["school_name_present", "court_dates_in_range", "people_db_school_ids_non_negative"]
        );
    }

    #[test]
    fn test_compare_count_reports_delta() {
        let ok = compare_count("people_db_race", 12, 12);
        assert!(ok.passed);

        let short = compare_count("people_db_race", 12, 9);
        assert!(!short.passed);
        assert_eq!(short.offending_count, 3);
        assert!(short.explanation.contains("delta -3"));

        let over = compare_count("people_db_race", 12, 15);
        assert!(over.explanation.contains("delta +3"));
    }
}
