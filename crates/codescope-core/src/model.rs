//! Graph data model for the code knowledge graph.
//!
//! Nodes are a tagged variant sharing a deterministic composite id; edges are
//! typed and directional with a small tagged union of per-type properties.
//! Ids are stable across re-ingestion so graph writes are idempotent.
//!
//! Id scheme: `{Kind}:{repo}:{filePath}[:name[:startLine]]`.

use serde::{Deserialize, Serialize};

// ============================================================================
// Node kinds
// ============================================================================

/// Discriminant for graph node variants, used as the store label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Repository,
    File,
    Function,
    Class,
    Module,
    Chunk,
    Concept,
}

impl NodeLabel {
    /// Label string as stored in the graph database.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Repository => "Repository",
            NodeLabel::File => "File",
            NodeLabel::Function => "Function",
            NodeLabel::Class => "Class",
            NodeLabel::Module => "Module",
            NodeLabel::Chunk => "Chunk",
            NodeLabel::Concept => "Concept",
        }
    }

    /// All labels, in a fixed order (used by metrics queries).
    pub fn all() -> &'static [NodeLabel] {
        &[
            NodeLabel::Repository,
            NodeLabel::File,
            NodeLabel::Function,
            NodeLabel::Class,
            NodeLabel::Module,
            NodeLabel::Chunk,
            NodeLabel::Concept,
        ]
    }
}

impl std::fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a class-like entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    Class,
    Interface,
    Enum,
    Type,
}

impl ClassKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassKind::Class => "class",
            ClassKind::Interface => "interface",
            ClassKind::Enum => "enum",
            ClassKind::Type => "type",
        }
    }
}

/// Origin of an imported module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleOrigin {
    /// Registry package (npm, crates.io, PyPI, ...)
    Npm,
    /// Relative path inside the repository
    Local,
    /// Language or runtime builtin
    Builtin,
}

impl ModuleOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleOrigin::Npm => "npm",
            ModuleOrigin::Local => "local",
            ModuleOrigin::Builtin => "builtin",
        }
    }

    /// Classify a raw import source string.
    ///
    /// Relative specifiers are local; a small set of well-known stdlib
    /// prefixes are builtin; everything else is treated as a registry package.
    pub fn classify(source: &str) -> Self {
        if source.starts_with('.') || source.starts_with('/') || source.starts_with("crate::") {
            ModuleOrigin::Local
        } else if source.starts_with("node:")
            || source.starts_with("std::")
            || source.starts_with("std/")
            || source == "std"
        {
            ModuleOrigin::Builtin
        } else {
            ModuleOrigin::Npm
        }
    }
}

/// Repository lifecycle status as persisted on the Repository node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Pending,
    Indexing,
    Ready,
    Error,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Pending => "pending",
            RepoStatus::Indexing => "indexing",
            RepoStatus::Ready => "ready",
            RepoStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// A node in the code knowledge graph.
///
/// The variant payloads mirror what is persisted as node properties; the
/// composite id is derived, never stored redundantly in the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "label")]
pub enum GraphNode {
    Repository {
        name: String,
        url: String,
        status: RepoStatus,
        last_indexed: Option<String>,
    },
    File {
        repo: String,
        path: String,
        extension: String,
        hash: String,
    },
    Function {
        repo: String,
        file: String,
        name: String,
        signature: String,
        start_line: u32,
        end_line: u32,
    },
    Class {
        repo: String,
        file: String,
        name: String,
        kind: ClassKind,
        start_line: u32,
        end_line: u32,
    },
    Module {
        name: String,
        origin: ModuleOrigin,
        version: Option<String>,
    },
    Chunk {
        repo: String,
        file: String,
        chunk_index: u32,
        vector_id: String,
    },
    Concept {
        name: String,
        description: Option<String>,
        confidence: Option<f64>,
    },
}

impl GraphNode {
    /// Label for this node variant.
    pub fn label(&self) -> NodeLabel {
        match self {
            GraphNode::Repository { .. } => NodeLabel::Repository,
            GraphNode::File { .. } => NodeLabel::File,
            GraphNode::Function { .. } => NodeLabel::Function,
            GraphNode::Class { .. } => NodeLabel::Class,
            GraphNode::Module { .. } => NodeLabel::Module,
            GraphNode::Chunk { .. } => NodeLabel::Chunk,
            GraphNode::Concept { .. } => NodeLabel::Concept,
        }
    }

    /// Deterministic composite id for this node.
    pub fn id(&self) -> String {
        match self {
            GraphNode::Repository { name, .. } => format!("Repository:{name}"),
            GraphNode::File { repo, path, .. } => format!("File:{repo}:{path}"),
            GraphNode::Function {
                repo,
                file,
                name,
                start_line,
                ..
            } => format!("Function:{repo}:{file}:{name}:{start_line}"),
            GraphNode::Class {
                repo,
                file,
                name,
                start_line,
                ..
            } => format!("Class:{repo}:{file}:{name}:{start_line}"),
            GraphNode::Module { name, .. } => format!("Module:{name}"),
            GraphNode::Chunk {
                repo,
                file,
                chunk_index,
                ..
            } => format!("Chunk:{repo}:{file}:{chunk_index}"),
            GraphNode::Concept { name, .. } => format!("Concept:{name}"),
        }
    }

    /// Short display name of the node, for results and logs.
    pub fn name(&self) -> &str {
        match self {
            GraphNode::Repository { name, .. } => name,
            GraphNode::File { path, .. } => path,
            GraphNode::Function { name, .. } => name,
            GraphNode::Class { name, .. } => name,
            GraphNode::Module { name, .. } => name,
            GraphNode::Chunk { vector_id, .. } => vector_id,
            GraphNode::Concept { name, .. } => name,
        }
    }

    /// The sentinel module node unresolved references point at.
    pub fn unknown_module(repo: &str) -> GraphNode {
        GraphNode::Module {
            name: format!("unknown:{repo}"),
            origin: ModuleOrigin::Local,
            version: None,
        }
    }
}

// ============================================================================
// Edges
// ============================================================================

/// Typed, directional relationship between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// Repository → File
    Contains,
    /// File → Function | Class
    Defines,
    /// File → Module
    Imports,
    /// Function → Function
    Calls,
    /// Class → Class
    Extends,
    /// Class → Class
    Implements,
    /// File → File
    References,
    /// File → Chunk
    HasChunk,
    /// entity → Concept
    TaggedWith,
    /// Concept → Concept
    RelatedTo,
}

impl EdgeType {
    /// Relationship type string as stored in the graph database.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Contains => "CONTAINS",
            EdgeType::Defines => "DEFINES",
            EdgeType::Imports => "IMPORTS",
            EdgeType::Calls => "CALLS",
            EdgeType::Extends => "EXTENDS",
            EdgeType::Implements => "IMPLEMENTS",
            EdgeType::References => "REFERENCES",
            EdgeType::HasChunk => "HAS_CHUNK",
            EdgeType::TaggedWith => "TAGGED_WITH",
            EdgeType::RelatedTo => "RELATED_TO",
        }
    }

    /// Parse a store-side relationship type string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CONTAINS" => Some(EdgeType::Contains),
            "DEFINES" => Some(EdgeType::Defines),
            "IMPORTS" => Some(EdgeType::Imports),
            "CALLS" => Some(EdgeType::Calls),
            "EXTENDS" => Some(EdgeType::Extends),
            "IMPLEMENTS" => Some(EdgeType::Implements),
            "REFERENCES" => Some(EdgeType::References),
            "HAS_CHUNK" => Some(EdgeType::HasChunk),
            "TAGGED_WITH" => Some(EdgeType::TaggedWith),
            "RELATED_TO" => Some(EdgeType::RelatedTo),
            _ => None,
        }
    }

    /// All relationship types, in a fixed order.
    pub fn all() -> &'static [EdgeType] {
        &[
            EdgeType::Contains,
            EdgeType::Defines,
            EdgeType::Imports,
            EdgeType::Calls,
            EdgeType::Extends,
            EdgeType::Implements,
            EdgeType::References,
            EdgeType::HasChunk,
            EdgeType::TaggedWith,
            EdgeType::RelatedTo,
        ]
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a module import binds symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportKind {
    Named,
    Default,
    Namespace,
    SideEffect,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Named => "named",
            ImportKind::Default => "default",
            ImportKind::Namespace => "namespace",
            ImportKind::SideEffect => "side-effect",
        }
    }
}

/// Per-type edge properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeProps {
    #[default]
    None,
    Defines {
        start_line: u32,
        end_line: u32,
    },
    Imports {
        kind: ImportKind,
        symbols: Vec<String>,
    },
    Calls {
        call_count: u32,
        is_async: bool,
    },
    HasChunk {
        chunk_index: u32,
    },
    TaggedWith {
        confidence: f64,
    },
    RelatedTo {
        similarity: f64,
        kind: String,
    },
}

/// A directed edge between two node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub edge_type: EdgeType,
    #[serde(default)]
    pub props: EdgeProps,
}

impl GraphEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, edge_type: EdgeType) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            edge_type,
            props: EdgeProps::None,
        }
    }

    pub fn with_props(mut self, props: EdgeProps) -> Self {
        self.props = props;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_composite_and_stable() {
        let func = GraphNode::Function {
            repo: "r1".into(),
            file: "src/main.rs".into(),
            name: "main".into(),
            signature: "fn main()".into(),
            start_line: 3,
            end_line: 10,
        };
        assert_eq!(func.id(), "Function:r1:src/main.rs:main:3");
        assert_eq!(func.id(), func.clone().id());
        assert_eq!(func.label(), NodeLabel::Function);
    }

    #[test]
    fn file_id_uses_repo_and_path() {
        let file = GraphNode::File {
            repo: "r1".into(),
            path: "a/b.ts".into(),
            extension: "ts".into(),
            hash: "deadbeef".into(),
        };
        assert_eq!(file.id(), "File:r1:a/b.ts");
    }

    #[test]
    fn edge_type_round_trips_store_strings() {
        for et in EdgeType::all() {
            assert_eq!(EdgeType::parse(et.as_str()), Some(*et));
        }
        assert_eq!(EdgeType::parse("NOPE"), None);
    }

    #[test]
    fn module_origin_classification() {
        assert_eq!(ModuleOrigin::classify("./util"), ModuleOrigin::Local);
        assert_eq!(ModuleOrigin::classify("../x"), ModuleOrigin::Local);
        assert_eq!(ModuleOrigin::classify("node:fs"), ModuleOrigin::Builtin);
        assert_eq!(ModuleOrigin::classify("std::io"), ModuleOrigin::Builtin);
        assert_eq!(ModuleOrigin::classify("react"), ModuleOrigin::Npm);
    }

    #[test]
    fn unknown_module_sentinel_is_per_repo() {
        let a = GraphNode::unknown_module("r1");
        let b = GraphNode::unknown_module("r2");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), "Module:unknown:r1");
    }
}
