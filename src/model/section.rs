/// A section of a schema YAML file. Closed enumeration: each section has its
/// own `delete_schema_*` handler and participates in `merge_patch`/`pp_dict`
/// the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaSection {
    Models,
    Seeds,
    Snapshots,
    Analyses,
    Sources,
    Macros,
    Exposures,
    Metrics,
    Groups,
    SemanticModels,
    UnitTests,
    SavedQueries,
    DataTests,
}

impl SchemaSection {
    pub const ALL: [SchemaSection; 13] = [
        SchemaSection::Models,
        SchemaSection::Seeds,
        SchemaSection::Snapshots,
        SchemaSection::Analyses,
        SchemaSection::Sources,
        SchemaSection::Macros,
        SchemaSection::Exposures,
        SchemaSection::Metrics,
        SchemaSection::Groups,
        SchemaSection::SemanticModels,
        SchemaSection::UnitTests,
        SchemaSection::SavedQueries,
        SchemaSection::DataTests,
    ];

    /// The mssa family used by `delete_schema_mssa_links`: sections whose
    /// elements patch a node living in its own SQL file.
    pub const MSSA: [SchemaSection; 4] = [
        SchemaSection::Models,
        SchemaSection::Seeds,
        SchemaSection::Snapshots,
        SchemaSection::Analyses,
    ];

    pub fn is_mssa(self) -> bool {
        Self::MSSA.contains(&self)
    }

    pub fn key(self) -> &'static str {
        match self {
            SchemaSection::Models => "models",
            SchemaSection::Seeds => "seeds",
            SchemaSection::Snapshots => "snapshots",
            SchemaSection::Analyses => "analyses",
            SchemaSection::Sources => "sources",
            SchemaSection::Macros => "macros",
            SchemaSection::Exposures => "exposures",
            SchemaSection::Metrics => "metrics",
            SchemaSection::Groups => "groups",
            SchemaSection::SemanticModels => "semantic_models",
            SchemaSection::UnitTests => "unit_tests",
            SchemaSection::SavedQueries => "saved_queries",
            SchemaSection::DataTests => "data_tests",
        }
    }

    /// The manifest unique_id prefix produced by elements of this section,
    /// used by `delete_schema_mssa_links` to match `node_patches` entries.
    /// `DataTests` shares the mechanism (its elements patch `test.*` nodes
    /// the same way mssa sections patch their own prefix) without being
    /// itself part of the mssa family -- see `is_mssa`.
    pub fn id_prefix(self) -> Option<&'static str> {
        match self {
            SchemaSection::Models => Some("model"),
            SchemaSection::Seeds => Some("seed"),
            SchemaSection::Snapshots => Some("snapshot"),
            SchemaSection::Analyses => Some("analysis"),
            SchemaSection::DataTests => Some("test"),
            _ => None,
        }
    }
}

impl std::fmt::Display for SchemaSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}
