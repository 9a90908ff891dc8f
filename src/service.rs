use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a table service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("index {index} is out of range for a table of {size} records")]
    IndexOutOfRange { index: usize, size: usize },
    #[error("backend error: {0}")]
    Backend(String),
}

/// A single row, as an ordered list of named fields. Missing values are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, Option<String>)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style push, mostly useful to assemble records in one expression.
    pub fn with(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.push(name, value);
        self
    }

    /// Appends a field, replacing an existing field with the same name in place.
    pub fn push(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }
}

/// Opaque decision label attached to a record, e.g. "approved".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decision(String);

impl Decision {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn approved() -> Self {
        Self::new("approved")
    }

    pub fn declined() -> Self {
        Self::new("declined")
    }

    pub fn maybe() -> Self {
        Self::new("maybe")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The data service the inspector talks to.
///
/// Indices address the clustered table. Related calls are the unclustered
/// rows that were merged into the clustered row at the same index.
#[async_trait]
pub trait TableService: Send + Sync {
    /// Number of records in the clustered table.
    async fn size(&self) -> Result<usize, ServiceError>;

    /// Column names of the related call records.
    async fn related_column_names(&self) -> Result<Vec<String>, ServiceError>;

    async fn table_row(&self, index: usize) -> Result<Record, ServiceError>;

    async fn related_calls(&self, index: usize) -> Result<Vec<Record>, ServiceError>;

    /// Advisory hint that `index` is being looked at. Nothing depends on the outcome.
    async fn schedule_snapshot(&self, index: usize) -> Result<(), ServiceError>;

    async fn persist_decision(&self, index: usize, decision: &Decision)
    -> Result<(), ServiceError>;
}
