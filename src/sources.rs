//! Data source listing shared by `GET /sources` and `askdata sources`.

use serde::Serialize;

use askdata_core::SchemaCatalog;

use crate::dispatch::BackendRegistry;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSummary {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub tables: Vec<String>,
    /// Backend kind (`"sqlite"`, `"http"`, ...) or `None` when unconfigured.
    pub backend: Option<String>,
    pub is_default: bool,
}

/// One entry per catalog source, in catalog order, followed by any
/// registered backend the catalog does not describe.
pub fn list_sources(catalog: &SchemaCatalog, backends: &BackendRegistry) -> Vec<SourceSummary> {
    let registered = backends.describe();
    let default_source = backends.default_source();

    let mut out: Vec<SourceSummary> = catalog
        .describe()
        .iter()
        .map(|source| SourceSummary {
            id: source.id.clone(),
            display_name: source.display_name.clone(),
            description: source.description.clone(),
            tables: source.tables.iter().map(|t| t.name.clone()).collect(),
            backend: registered
                .iter()
                .find(|b| b.id == source.id)
                .map(|b| b.kind.clone()),
            is_default: source.id == default_source,
        })
        .collect();

    for info in registered {
        if !catalog.contains(&info.id) {
            out.push(SourceSummary {
                display_name: info.id.clone(),
                id: info.id,
                description: String::new(),
                tables: Vec::new(),
                backend: Some(info.kind),
                is_default: info.is_default,
            });
        }
    }

    out
}

/// Print the source table for `askdata sources`.
pub fn print_sources(catalog: &SchemaCatalog, backends: &BackendRegistry) {
    println!("{:<16} {:<10} {:<8} TABLES", "SOURCE", "BACKEND", "DEFAULT");
    for s in list_sources(catalog, backends) {
        println!(
            "{:<16} {:<10} {:<8} {}",
            s.id,
            s.backend.as_deref().unwrap_or("NONE"),
            if s.is_default { "yes" } else { "" },
            s.tables.join(", ")
        );
    }
}
