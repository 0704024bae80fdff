//! Entity/relationship extraction.
//!
//! Normalizes a [`ParseResult`] into graph nodes and typed edges for one
//! file. Call and heritage targets cannot be resolved from a single file, so
//! they are returned as *pending* references for the ingestion resolution
//! pass.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunker::Chunk;
use crate::model::{ClassKind, EdgeProps, EdgeType, GraphEdge, GraphNode, ModuleOrigin};
use crate::parser::{EntityKind, HeritageRelation, ParseResult};

/// A call edge waiting for target resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCall {
    /// Id of the calling Function node.
    pub caller_id: String,
    /// Bare name of the callee.
    pub callee: String,
    pub call_count: u32,
    pub is_async: bool,
}

/// An EXTENDS/IMPLEMENTS edge waiting for target resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingHeritage {
    /// Id of the subclass Class node.
    pub class_id: String,
    /// Bare name of the extended/implemented type.
    pub target: String,
    pub relation: HeritageRelation,
}

/// A REFERENCES edge candidate: a relative import resolved to an in-repo
/// path, pending existence check against the repository's file table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReference {
    pub from_file_id: String,
    /// Normalized repository-relative path, possibly without extension.
    pub target_path: String,
}

/// Everything extracted from one file, ready for graph ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFragment {
    pub file_node: GraphNode,
    /// Function and Class nodes defined in the file.
    pub entities: Vec<GraphNode>,
    /// Module nodes referenced by imports, deduplicated.
    pub modules: Vec<GraphNode>,
    /// DEFINES and IMPORTS edges (fully resolvable from this file alone).
    pub edges: Vec<GraphEdge>,
    pub pending_calls: Vec<PendingCall>,
    pub pending_heritage: Vec<PendingHeritage>,
    pub pending_references: Vec<PendingReference>,
}

/// Extract the graph fragment for one parsed file.
///
/// `content_hash` is the SHA-256 of the file's raw bytes; it becomes the File
/// node's identity for change detection.
pub fn extract_fragment(repo: &str, parse: &ParseResult, content_hash: &str) -> FileFragment {
    let path = &parse.file_path;
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let file_node = GraphNode::File {
        repo: repo.to_string(),
        path: path.clone(),
        extension,
        hash: content_hash.to_string(),
    };
    let file_id = file_node.id();

    let mut entities = Vec::new();
    let mut edges = Vec::new();

    for parsed in &parse.entities {
        let node = if parsed.kind.is_callable() {
            GraphNode::Function {
                repo: repo.to_string(),
                file: path.clone(),
                name: parsed.name.clone(),
                signature: parsed.signature.clone(),
                start_line: parsed.start_line,
                end_line: parsed.end_line,
            }
        } else {
            GraphNode::Class {
                repo: repo.to_string(),
                file: path.clone(),
                name: parsed.name.clone(),
                kind: class_kind(parsed.kind),
                start_line: parsed.start_line,
                end_line: parsed.end_line,
            }
        };
        edges.push(
            GraphEdge::new(&file_id, node.id(), EdgeType::Defines).with_props(EdgeProps::Defines {
                start_line: parsed.start_line,
                end_line: parsed.end_line,
            }),
        );
        entities.push(node);
    }

    // Modules, deduplicated by identity; IMPORTS edges keep per-import kind
    // and symbols. Relative imports additionally become REFERENCES
    // candidates.
    let mut modules: BTreeMap<String, GraphNode> = BTreeMap::new();
    let mut pending_references = Vec::new();
    for import in &parse.imports {
        let module = GraphNode::Module {
            name: import.source.clone(),
            origin: ModuleOrigin::classify(&import.source),
            version: None,
        };
        let module_id = module.id();
        modules.entry(module_id.clone()).or_insert(module);
        edges.push(
            GraphEdge::new(&file_id, module_id, EdgeType::Imports).with_props(EdgeProps::Imports {
                kind: import.kind,
                symbols: import.symbols.clone(),
            }),
        );

        if let Some(target_path) = resolve_relative(path, &import.source) {
            pending_references.push(PendingReference {
                from_file_id: file_id.clone(),
                target_path,
            });
        }
    }

    // Calls aggregated per callee; the caller is the innermost callable whose
    // line range contains the call site. Top-level calls have no Function
    // source and are dropped.
    let mut call_agg: BTreeMap<(String, String), (u32, bool)> = BTreeMap::new();
    for call in &parse.calls {
        let Some(caller) = innermost_callable(&entities, call.line) else {
            continue;
        };
        let entry = call_agg
            .entry((caller.id(), call.callee.clone()))
            .or_insert((0, false));
        entry.0 += 1;
        entry.1 |= call.is_await;
    }
    let pending_calls = call_agg
        .into_iter()
        .map(|((caller_id, callee), (call_count, is_async))| PendingCall {
            caller_id,
            callee,
            call_count,
            is_async,
        })
        .collect();

    let mut pending_heritage = Vec::new();
    for heritage in &parse.heritage {
        let Some(class_node) = entities.iter().find(|e| {
            matches!(e, GraphNode::Class { name, .. } if *name == heritage.class_name)
        }) else {
            continue;
        };
        let relation = heritage
            .relation
            .unwrap_or_else(|| infer_heritage_relation(class_node, &heritage.target));
        pending_heritage.push(PendingHeritage {
            class_id: class_node.id(),
            target: heritage.target.clone(),
            relation,
        });
    }

    FileFragment {
        file_node,
        entities,
        modules: modules.into_values().collect(),
        edges,
        pending_calls,
        pending_heritage,
        pending_references,
    }
}

/// Chunk nodes and HAS_CHUNK edges for one file's chunk set.
///
/// `vector_id` is the vector-store document id `{repo}:{path}:{index}`.
pub fn chunk_nodes(repo: &str, path: &str, chunks: &[Chunk]) -> (Vec<GraphNode>, Vec<GraphEdge>) {
    let file_id = format!("File:{repo}:{path}");
    let mut nodes = Vec::with_capacity(chunks.len());
    let mut edges = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let node = GraphNode::Chunk {
            repo: repo.to_string(),
            file: path.to_string(),
            chunk_index: chunk.index,
            vector_id: format!("{repo}:{path}:{}", chunk.index),
        };
        edges.push(
            GraphEdge::new(&file_id, node.id(), EdgeType::HasChunk).with_props(
                EdgeProps::HasChunk {
                    chunk_index: chunk.index,
                },
            ),
        );
        nodes.push(node);
    }
    (nodes, edges)
}

fn class_kind(kind: EntityKind) -> ClassKind {
    match kind {
        EntityKind::Interface => ClassKind::Interface,
        EntityKind::Enum => ClassKind::Enum,
        EntityKind::Type => ClassKind::Type,
        _ => ClassKind::Class,
    }
}

/// Split an undifferentiated base-list target (C#) into EXTENDS vs
/// IMPLEMENTS. An interface's own bases are always EXTENDS; for classes the
/// `IFoo` naming convention marks interface targets.
fn infer_heritage_relation(class_node: &GraphNode, target: &str) -> HeritageRelation {
    let subclass_is_interface = matches!(
        class_node,
        GraphNode::Class {
            kind: ClassKind::Interface,
            ..
        }
    );
    if !subclass_is_interface && looks_like_interface(target) {
        HeritageRelation::Implements
    } else {
        HeritageRelation::Extends
    }
}

/// `IFoo` convention: I followed by another uppercase letter.
fn looks_like_interface(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next() == Some('I') && chars.next().map(|c| c.is_ascii_uppercase()).unwrap_or(false)
}

/// The innermost callable entity containing `line`, by smallest span.
fn innermost_callable(entities: &[GraphNode], line: u32) -> Option<&GraphNode> {
    entities
        .iter()
        .filter(|e| {
            matches!(e, GraphNode::Function { start_line, end_line, .. }
                if *start_line <= line && line <= *end_line)
        })
        .min_by_key(|e| match e {
            GraphNode::Function {
                start_line,
                end_line,
                ..
            } => end_line - start_line,
            _ => u32::MAX,
        })
}

/// Resolve a relative import specifier against the importing file's
/// directory. Non-relative specifiers return `None`.
fn resolve_relative(file_path: &str, source: &str) -> Option<String> {
    if !source.starts_with('.') {
        return None;
    }
    let dir = match file_path.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    };
    let mut segments: Vec<&str> = if dir.is_empty() {
        Vec::new()
    } else {
        dir.split('/').collect()
    };
    for part in source.split('/') {
        match part {
            "." | "" => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Language, ParserLimits, ParserRouter};

    fn fragment(path: &str, source: &str) -> FileFragment {
        let router = ParserRouter::new(ParserLimits::default());
        let parse = router.parse_content(path, source);
        assert!(parse.success, "parse failed: {:?}", parse.errors);
        extract_fragment("r1", &parse, "hash0")
    }

    #[test]
    fn defines_edges_carry_line_ranges() {
        let frag = fragment("src/a.ts", "export function go(): void {\n  run();\n}\n");
        assert_eq!(frag.file_node.id(), "File:r1:src/a.ts");
        let func = frag
            .entities
            .iter()
            .find(|e| e.name() == "go")
            .expect("function extracted");
        assert!(func.id().starts_with("Function:r1:src/a.ts:go:"));

        let defines = frag
            .edges
            .iter()
            .find(|e| e.edge_type == EdgeType::Defines)
            .unwrap();
        assert_eq!(defines.from, "File:r1:src/a.ts");
        assert!(matches!(
            defines.props,
            EdgeProps::Defines { start_line: 1, .. }
        ));
    }

    #[test]
    fn imports_become_modules_and_references() {
        let frag = fragment(
            "src/app/main.ts",
            "import { helper } from \"../lib/util\";\nimport react from \"react\";\n",
        );
        assert_eq!(frag.modules.len(), 2);
        let local = frag
            .modules
            .iter()
            .find(|m| m.name() == "../lib/util")
            .unwrap();
        assert!(matches!(
            local,
            GraphNode::Module {
                origin: ModuleOrigin::Local,
                ..
            }
        ));
        assert_eq!(frag.pending_references.len(), 1);
        assert_eq!(frag.pending_references[0].target_path, "src/lib/util");
    }

    #[test]
    fn calls_aggregate_per_caller_and_callee() {
        let source = "function outer() {\n  inner();\n  inner();\n}\nfunction inner() {}\n";
        let frag = fragment("src/c.js", source);
        assert_eq!(frag.pending_calls.len(), 1);
        let call = &frag.pending_calls[0];
        assert!(call.caller_id.contains(":outer:"));
        assert_eq!(call.callee, "inner");
        assert_eq!(call.call_count, 2);
    }

    #[test]
    fn top_level_calls_are_dropped() {
        let frag = fragment("src/d.js", "setup();\nfunction setup() {}\n");
        assert!(frag.pending_calls.is_empty());
    }

    #[test]
    fn heritage_binds_to_class_node() {
        let source = "class Base {}\nclass Child extends Base {}\n";
        let frag = fragment("src/e.js", source);
        assert_eq!(frag.pending_heritage.len(), 1);
        assert!(frag.pending_heritage[0].class_id.contains(":Child:"));
        assert_eq!(frag.pending_heritage[0].target, "Base");
        assert_eq!(frag.pending_heritage[0].relation, HeritageRelation::Extends);
    }

    #[test]
    fn csharp_base_list_splits_extends_and_implements() {
        let source = "class OrderService : ServiceBase, IOrderService { }\n";
        let frag = fragment("OrderService.cs", source);
        assert!(frag
            .pending_heritage
            .iter()
            .any(|h| h.target == "ServiceBase" && h.relation == HeritageRelation::Extends));
        assert!(frag
            .pending_heritage
            .iter()
            .any(|h| h.target == "IOrderService" && h.relation == HeritageRelation::Implements));
    }

    #[test]
    fn interface_bases_are_always_extends() {
        let source = "interface IChild : IParent { }\n";
        let frag = fragment("IChild.cs", source);
        assert!(frag
            .pending_heritage
            .iter()
            .any(|h| h.target == "IParent" && h.relation == HeritageRelation::Extends));
    }

    #[test]
    fn chunk_nodes_carry_vector_ids() {
        let chunks = crate::chunker::chunk_text("a\nb\n", &crate::chunker::ChunkConfig::default())
            .unwrap();
        let (nodes, edges) = chunk_nodes("r1", "src/a.ts", &chunks);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id(), "Chunk:r1:src/a.ts:0");
        assert!(matches!(
            &nodes[0],
            GraphNode::Chunk { vector_id, .. } if vector_id == "r1:src/a.ts:0"
        ));
        assert_eq!(edges[0].edge_type, EdgeType::HasChunk);
    }

    #[test]
    fn relative_resolution_handles_dotdot() {
        assert_eq!(
            resolve_relative("src/app/main.ts", "../lib/util"),
            Some("src/lib/util".into())
        );
        assert_eq!(
            resolve_relative("main.ts", "./util"),
            Some("util".into())
        );
        assert_eq!(resolve_relative("src/a.ts", "react"), None);
        // Escaping the repository root resolves to nothing.
        assert_eq!(resolve_relative("a.ts", "../outside"), None);
    }

    #[test]
    fn idempotent_ids_across_reextraction() {
        let source = "function f() {}\n";
        let one = fragment("src/f.js", source);
        let two = fragment("src/f.js", source);
        assert_eq!(
            one.entities.iter().map(|e| e.id()).collect::<Vec<_>>(),
            two.entities.iter().map(|e| e.id()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn unsupported_language_yields_failed_parse() {
        let router = ParserRouter::default();
        let parse = router.parse_content("x.zig", "fn main() void {}");
        assert!(!parse.success);
        let frag = extract_fragment("r1", &parse, "h");
        assert!(frag.entities.is_empty());
        assert_eq!(frag.file_node.id(), "File:r1:x.zig");
    }

    #[test]
    fn language_coverage_csharp_goes_through_router() {
        let router = ParserRouter::default();
        let parse = router.parse_content("A.cs", "class A { void M() { } }");
        assert_eq!(parse.language, Language::CSharp);
        let frag = extract_fragment("r1", &parse, "h");
        assert!(frag.entities.iter().any(|e| e.name() == "A"));
    }
}
