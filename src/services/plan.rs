//! Import plan for the CourtListener people database.
//!
//! The plan is a small DAG: each table lists the tables its foreign keys
//! reference, and the declared order must be a topological order of that
//! graph. `ImportPlan::validate` checks this so the load order is verified
//! rather than assumed.

use std::collections::HashSet;

/// One table of the dataset family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    /// Database table name; also the local CSV file stem.
    pub name: &'static str,
    /// File-name stems this table is published under in the bucket.
    pub remote_stems: &'static [&'static str],
    /// Tables referenced by this table's foreign keys (self-references excluded).
    pub depends_on: &'static [&'static str],
    /// Whether the primary key is an integer (courts use short string ids).
    pub integer_id: bool,
}

pub const PEOPLE_DB_TABLES: &[TableSpec] = &[
    TableSpec {
        name: "people_db_court",
        remote_stems: &["courts", "people_db_court"],
        depends_on: &[],
        integer_id: false,
    },
    TableSpec {
        name: "people_db_person",
        remote_stems: &["people-db-people", "people_db_person"],
        depends_on: &[],
        integer_id: true,
    },
    TableSpec {
        name: "people_db_school",
        remote_stems: &["people-db-schools", "people_db_school"],
        depends_on: &[],
        integer_id: true,
    },
    TableSpec {
        name: "people_db_position",
        remote_stems: &["people-db-positions", "people_db_position"],
        depends_on: &["people_db_person", "people_db_court", "people_db_school"],
        integer_id: true,
    },
    TableSpec {
        name: "people_db_education",
        remote_stems: &["people-db-educations", "people_db_education"],
        depends_on: &["people_db_person", "people_db_school"],
        integer_id: true,
    },
    TableSpec {
        name: "people_db_politicalaffiliation",
        remote_stems: &[
            "people-db-political-affiliations",
            "people_db_politicalaffiliation",
        ],
        depends_on: &["people_db_person"],
        integer_id: true,
    },
    TableSpec {
        name: "people_db_race",
        remote_stems: &["people-db-races", "people_db_race"],
        depends_on: &["people_db_person"],
        integer_id: true,
    },
    TableSpec {
        name: "people_db_source",
        remote_stems: &["people-db-sources", "people_db_source"],
        depends_on: &["people_db_person"],
        integer_id: true,
    },
];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PlanError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Table {table} depends on unknown table {dependency}")]
    UnknownDependency { table: String, dependency: String },

    #[error("Table {table} is ordered before its dependency {dependency}")]
    DependencyOrder { table: String, dependency: String },

    #[error("Table {0} is declared more than once")]
    Duplicate(String),
}

/// Ordered table list satisfying foreign-key dependencies.
#[derive(Debug, Clone)]
pub struct ImportPlan {
    tables: Vec<TableSpec>,
}

impl Default for ImportPlan {
    fn default() -> Self {
        Self::people_db()
    }
}

impl ImportPlan {
    /// The fixed people-database plan. Call `validate` once at startup.
    pub fn people_db() -> Self {
        Self {
            tables: PEOPLE_DB_TABLES.to_vec(),
        }
    }

    /// Build a plan from an explicit table list, rejecting invalid orderings.
    pub fn new(tables: Vec<TableSpec>) -> Result<Self, PlanError> {
        let plan = Self { tables };
        plan.validate()?;
        Ok(plan)
    }

    /// Check that every dependency is declared and appears earlier in the order.
    pub fn validate(&self) -> Result<(), PlanError> {
        let known: HashSet<&str> = self.tables.iter().map(|t| t.name).collect();
        let mut seen: HashSet<&str> = HashSet::new();

        for table in &self.tables {
            for dependency in table.depends_on {
                if !known.contains(dependency) {
                    return Err(PlanError::UnknownDependency {
                        table: table.name.to_string(),
                        dependency: dependency.to_string(),
                    });
                }
                if !seen.contains(dependency) {
                    return Err(PlanError::DependencyOrder {
                        table: table.name.to_string(),
                        dependency: dependency.to_string(),
                    });
                }
            }
            if !seen.insert(table.name) {
                return Err(PlanError::Duplicate(table.name.to_string()));
            }
        }

        Ok(())
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.name == name)
    }

    /// Map a published file stem (e.g. "people-db-people") to its table.
    pub fn table_for_remote_stem(&self, stem: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.remote_stems.contains(&stem))
    }

    /// Resolve a requested subset into plan order.
    ///
    /// `None` selects every table. Unknown names fail before anything is
    /// returned; duplicates collapse.
    pub fn resolve(&self, requested: Option<&[String]>) -> Result<Vec<TableSpec>, PlanError> {
        let Some(requested) = requested else {
            return Ok(self.tables.clone());
        };

        let mut wanted = HashSet::new();
        for name in requested {
            if self.get(name).is_none() {
                return Err(PlanError::UnknownTable(name.clone()));
            }
            wanted.insert(name.as_str());
        }

        Ok(self
            .tables
            .iter()
            .filter(|t| wanted.contains(t.name))
            .copied()
            .collect())
    }

    /// Tables that depend on `name`, directly or transitively, in plan order.
    pub fn dependents_of(&self, name: &str) -> Vec<&'static str> {
        let mut affected: HashSet<&str> = HashSet::from([name]);
        let mut dependents = Vec::new();

        for table in &self.tables {
            if table.depends_on.iter().any(|d| affected.contains(d)) {
                affected.insert(table.name);
                dependents.push(table.name);
            }
        }

        dependents
    }
}
