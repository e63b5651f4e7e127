use std::fmt;

/// Stable identity of a manifest object, e.g. `model.my_project.customers` or
/// `macro.dbt.ref`. The planner never parses the internal structure of a
/// `UniqueId` beyond what `NodeKind` below exposes for dispatch -- it is
/// otherwise an opaque, cloneable, hashable string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniqueId(String);

impl UniqueId {
    pub fn new(id: impl Into<String>) -> UniqueId {
        UniqueId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first dot-separated segment, e.g. `model`, `source`, `macro`.
    fn prefix(&self) -> &str {
        self.0.split('.').next().unwrap_or("")
    }

    /// The second dot-separated segment. For `model.proj.name` this is the
    /// package/project name; combined with `local_name` it disambiguates
    /// schema-patch lookups in `delete_schema_mssa_links`.
    pub fn package(&self) -> &str {
        self.0.splitn(3, '.').nth(1).unwrap_or("")
    }

    /// The trailing dot-separated segment, used to match a schema element's
    /// `name` key against a node's own name.
    pub fn local_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or("")
    }

    pub fn node_kind(&self) -> Option<NodeKind> {
        match self.prefix() {
            "model" => Some(NodeKind::Model),
            "seed" => Some(NodeKind::Seed),
            "snapshot" => Some(NodeKind::Snapshot),
            "analysis" => Some(NodeKind::Analysis),
            "test" => Some(NodeKind::GenericTest),
            "macro" => Some(NodeKind::Macro),
            "source" => Some(NodeKind::Source),
            "exposure" => Some(NodeKind::Exposure),
            "metric" => Some(NodeKind::Metric),
            "semantic_model" => Some(NodeKind::SemanticModel),
            "saved_query" => Some(NodeKind::SavedQuery),
            "unit_test" => Some(NodeKind::UnitTest),
            "group" => Some(NodeKind::Group),
            _ => None,
        }
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UniqueId {
    fn from(s: &str) -> UniqueId {
        UniqueId::new(s)
    }
}

impl From<String> for UniqueId {
    fn from(s: String) -> UniqueId {
        UniqueId::new(s)
    }
}

/// The manifest-entry kind a `UniqueId` addresses. A closed enumeration so
/// dispatch in the invalidation engine is an exhaustive match, never a
/// type-hierarchy lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Model,
    Seed,
    Snapshot,
    Analysis,
    SingularTest,
    GenericTest,
    Macro,
    Source,
    Exposure,
    Metric,
    Group,
    SemanticModel,
    SavedQuery,
    UnitTest,
}

impl NodeKind {
    /// `true` for the "mssat" family: nodes that live in their own SQL file
    /// and may additionally carry a schema-file patch.
    pub fn is_mssat(self) -> bool {
        matches!(
            self,
            NodeKind::Model
                | NodeKind::Seed
                | NodeKind::Snapshot
                | NodeKind::Analysis
                | NodeKind::SingularTest
        )
    }

    /// The schema section a patch on this kind of node lives under, for the
    /// mssa family (Model/Seed/Snapshot/Analysis -- SingularTest has no
    /// schema-patch section of its own).
    pub fn mssat_schema_section(self) -> Option<crate::model::SchemaSection> {
        use crate::model::SchemaSection as S;
        match self {
            NodeKind::Model => Some(S::Models),
            NodeKind::Seed => Some(S::Seeds),
            NodeKind::Snapshot => Some(S::Snapshots),
            NodeKind::Analysis => Some(S::Analyses),
            _ => None,
        }
    }
}

/// The parse kind of a `SourceFile`. Closed enumeration matching the tree of
/// file types the external parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseKind {
    Model,
    Seed,
    Snapshot,
    Analysis,
    SingularTest,
    Macro,
    GenericTest,
    Schema,
    Documentation,
    Fixture,
}

impl ParseKind {
    pub fn is_schema(self) -> bool {
        matches!(self, ParseKind::Schema)
    }

    /// `true` for {Macro, GenericTest} -- the "mg" family.
    pub fn is_mg(self) -> bool {
        matches!(self, ParseKind::Macro | ParseKind::GenericTest)
    }

    /// `true` for {Model, Seed, Snapshot, Analysis, SingularTest} -- the
    /// "mssat" family.
    pub fn is_mssat(self) -> bool {
        matches!(
            self,
            ParseKind::Model
                | ParseKind::Seed
                | ParseKind::Snapshot
                | ParseKind::Analysis
                | ParseKind::SingularTest
        )
    }

    /// The schema section a mssat parse kind's patches live under, if any.
    pub fn schema_section(self) -> Option<crate::model::SchemaSection> {
        use crate::model::SchemaSection as S;
        match self {
            ParseKind::Model => Some(S::Models),
            ParseKind::Seed => Some(S::Seeds),
            ParseKind::Snapshot => Some(S::Snapshots),
            ParseKind::Analysis => Some(S::Analyses),
            _ => None,
        }
    }
}
