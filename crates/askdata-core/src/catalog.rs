//! Static registry of the queryable data sources.
//!
//! The catalog is loaded once at startup (either the built-in definition or a
//! TOML file with the same shape) and is read-only afterwards. Its textual
//! rendering grounds the translation prompt: source → tables → columns with
//! description and a few example values, followed by the table's sample
//! queries.
//!
//! # TOML shape
//!
//! ```toml
//! [[sources]]
//! id = "warehouse"
//! displayName = "Sales Warehouse"
//! description = "Orders and customers"
//!
//! [[sources.tables]]
//! name = "customers"
//! description = "One row per customer"
//! sampleQueries = ["SELECT COUNT(*) FROM customers"]
//!
//! [[sources.tables.columns]]
//! name = "id"
//! type = "INTEGER"
//! description = "Primary key"
//! examples = ["1001"]
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt::Write as _;
use std::path::Path;

use crate::models::{ColumnSchema, DataSourceSchema, TableSchema};

const BUILTIN_CATALOG: &str = include_str!("builtin_catalog.toml");

/// Limits applied when rendering the catalog as text.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Columns beyond this count are summarized as `(+N more columns)`.
    pub max_columns_per_table: usize,
    /// Example values listed per column.
    pub max_examples_per_column: usize,
    /// `sampleQueries` listed per table.
    pub max_sample_queries_per_table: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_columns_per_table: 12,
            max_examples_per_column: 3,
            max_sample_queries_per_table: 2,
        }
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    sources: Vec<DataSourceSchema>,
}

/// Read-only collection of [`DataSourceSchema`]s.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    sources: Vec<DataSourceSchema>,
}

impl SchemaCatalog {
    pub fn new(sources: Vec<DataSourceSchema>) -> Self {
        Self { sources }
    }

    /// The catalog shipped with the crate: warehouse, application database,
    /// CRM and event analytics.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_CATALOG).context("built-in catalog is malformed")
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content).context("Failed to parse catalog")?;

        let mut seen = std::collections::HashSet::new();
        for source in &file.sources {
            if source.id.trim().is_empty() {
                anyhow::bail!("catalog source id must not be empty");
            }
            if !seen.insert(source.id.as_str()) {
                anyhow::bail!("duplicate catalog source id: '{}'", source.id);
            }
        }

        Ok(Self::new(file.sources))
    }

    /// Load a catalog from a TOML file on disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid catalog file: {}", path.display()))
    }

    /// All data sources, in declaration order.
    pub fn describe(&self) -> &[DataSourceSchema] {
        &self.sources
    }

    pub fn get(&self, id: &str) -> Option<&DataSourceSchema> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Sources in scope for `for_source`: the single match, or every source
    /// when the id is absent or unknown.
    pub fn scoped(&self, for_source: Option<&str>) -> Vec<&DataSourceSchema> {
        match for_source.and_then(|id| self.get(id)) {
            Some(source) => vec![source],
            None => self.sources.iter().collect(),
        }
    }

    /// Render the catalog with default limits.
    pub fn render(&self, for_source: Option<&str>) -> String {
        self.render_with(for_source, &RenderOptions::default())
    }

    pub fn render_with(&self, for_source: Option<&str>, opts: &RenderOptions) -> String {
        let mut out = String::new();
        for source in self.scoped(for_source) {
            out.push_str(&render_source_header(source));
            for table in &source.tables {
                out.push_str(&render_table(table, opts));
            }
            out.push('\n');
        }
        out
    }
}

/// Heading block for one data source.
pub fn render_source_header(source: &DataSourceSchema) -> String {
    format!(
        "## Data source `{}` ({})\n{}\n",
        source.id, source.display_name, source.description
    )
}

/// Compact rendering of one table and its columns.
pub fn render_table(table: &TableSchema, opts: &RenderOptions) -> String {
    let mut out = format!("Table {}: {}\n", table.name, table.description);

    for column in table.columns.iter().take(opts.max_columns_per_table) {
        out.push_str(&render_column(column, opts.max_examples_per_column));
    }

    let hidden = table
        .columns
        .len()
        .saturating_sub(opts.max_columns_per_table);
    if hidden > 0 {
        let _ = writeln!(out, "  (+{} more columns)", hidden);
    }

    for query in table
        .sample_queries
        .iter()
        .take(opts.max_sample_queries_per_table)
    {
        let _ = writeln!(out, "  Sample query: {}", query.trim());
    }

    out
}

fn render_column(column: &ColumnSchema, max_examples: usize) -> String {
    let nullability = if column.nullable { "nullable" } else { "not null" };
    let mut line = format!(
        "  - {} ({}, {}): {}",
        column.name, column.data_type, nullability, column.description
    );

    let examples: Vec<&str> = column
        .examples
        .iter()
        .take(max_examples)
        .map(String::as_str)
        .collect();
    if !examples.is_empty() {
        let _ = write!(line, " e.g. {}", examples.join(", "));
    }

    line.push('\n');
    line
}
