//! Tree-sitter AST backend.
//!
//! One generic extraction loop serves every grammar: the per-language `.scm`
//! queries (see [`super::queries`]) share a capture naming convention, and the
//! loop groups captures per match into entities, imports, exports, calls and
//! heritage relations.
//!
//! Compiled queries are cached per language for the process lifetime.
//! Initialization is safe to invoke concurrently and runs at most once per
//! language.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tree_sitter::{Parser, Query, QueryCursor, StreamingIterator};

use super::queries;
use super::{
    HeritageRelation, Language, ParseDiagnostic, ParseResult, ParsedCall, ParsedEntity,
    ParsedExport, ParsedHeritage, ParsedImport, ParserLimits,
};
use crate::model::ImportKind;
use crate::parser::EntityKind;

/// Maximum length of an extracted signature line.
const MAX_SIGNATURE_CHARS: usize = 160;

fn grammar(language: Language) -> tree_sitter::Language {
    match language {
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::Java => tree_sitter_java::LANGUAGE.into(),
        Language::Go => tree_sitter_go::LANGUAGE.into(),
        Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        Language::C => tree_sitter_c::LANGUAGE.into(),
        Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        Language::Ruby => tree_sitter_ruby::LANGUAGE.into(),
        Language::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
    }
}

/// Process-wide compiled query cache.
fn query_cache() -> &'static Mutex<HashMap<Language, Arc<Query>>> {
    static CACHE: OnceLock<Mutex<HashMap<Language, Arc<Query>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn compiled_query(language: Language) -> Result<Arc<Query>, String> {
    let mut cache = query_cache().lock().expect("query cache poisoned");
    if let Some(q) = cache.get(&language) {
        return Ok(Arc::clone(q));
    }
    let source =
        queries::get_query(language).ok_or_else(|| format!("no query for {language}"))?;
    let query = Query::new(&grammar(language), source)
        .map_err(|e| format!("query compile failed for {language}: {e}"))?;
    let query = Arc::new(query);
    cache.insert(language, Arc::clone(&query));
    Ok(query)
}

/// Generic tree-sitter backend.
pub struct TreeSitterBackend;

impl TreeSitterBackend {
    /// Parse `content` with the grammar for `language` and extract the
    /// uniform result. Timeouts and grammar/query failures come back as
    /// failed results.
    pub fn parse(
        language: Language,
        file_path: &str,
        content: &str,
        limits: ParserLimits,
    ) -> ParseResult {
        let query = match compiled_query(language) {
            Ok(q) => q,
            Err(message) => return ParseResult::failed(file_path, language, message),
        };

        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&grammar(language)) {
            return ParseResult::failed(file_path, language, format!("grammar load failed: {e}"));
        }
        #[allow(deprecated)]
        parser.set_timeout_micros(limits.parse_timeout_ms * 1_000);

        let Some(tree) = parser.parse(content, None) else {
            return ParseResult::failed(
                file_path,
                language,
                format!("parse timed out after {}ms", limits.parse_timeout_ms),
            );
        };

        let mut result = ParseResult {
            file_path: file_path.to_string(),
            language,
            entities: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            calls: Vec::new(),
            heritage: Vec::new(),
            errors: Vec::new(),
            parse_time_ms: 0,
            success: true,
        };

        if tree.root_node().has_error() {
            result.errors.push(ParseDiagnostic::new(
                "syntax errors present; extraction may be partial",
            ));
        }

        extract(&query, &tree, content.as_bytes(), &mut result);
        result
    }
}

/// Per-match capture grouping state.
#[derive(Default)]
struct MatchCaptures<'a> {
    definition: Option<(EntityKind, tree_sitter::Node<'a>)>,
    name: Option<&'a str>,
    import_kind: Option<(ImportKind, tree_sitter::Node<'a>)>,
    import_source: Option<&'a str>,
    import_symbols: Vec<&'a str>,
    call: bool,
    call_await: bool,
    call_name: Option<(&'a str, u32)>,
    heritage_class: Option<&'a str>,
    extends_name: Option<&'a str>,
    implements_name: Option<&'a str>,
    heritage_target: Option<&'a str>,
    export_name: Option<(&'a str, u32)>,
}

fn extract(query: &Query, tree: &tree_sitter::Tree, source: &[u8], result: &mut ParseResult) {
    let capture_names = query.capture_names();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source);

    // Imports are keyed by the byte range of the import node so the generic
    // side-effect pattern does not duplicate more specific matches.
    let mut imports: HashMap<(usize, usize), ParsedImport> = HashMap::new();
    let mut seen_entities: HashMap<(EntityKind, String, u32), usize> = HashMap::new();
    let mut seen_calls: HashMap<(String, u32), usize> = HashMap::new();
    let mut seen_exports: Vec<(String, u32)> = Vec::new();

    while let Some(m) = matches.next() {
        let mut mc = MatchCaptures::default();

        for capture in m.captures {
            let capture_name = capture_names[capture.index as usize];
            let node = capture.node;
            let text = node.utf8_text(source).unwrap_or("");
            let line = node.start_position().row as u32 + 1;

            match capture_name {
                "definition.function" => mc.definition = Some((EntityKind::Function, node)),
                "definition.method" => mc.definition = Some((EntityKind::Method, node)),
                "definition.class" => mc.definition = Some((EntityKind::Class, node)),
                "definition.interface" => mc.definition = Some((EntityKind::Interface, node)),
                "definition.enum" => mc.definition = Some((EntityKind::Enum, node)),
                "definition.type" => mc.definition = Some((EntityKind::Type, node)),
                n if n.starts_with("name.definition.") => mc.name = Some(text),
                "import.named" => mc.import_kind = Some((ImportKind::Named, node)),
                "import.default" => mc.import_kind = Some((ImportKind::Default, node)),
                "import.namespace" => mc.import_kind = Some((ImportKind::Namespace, node)),
                "import.side_effect" => mc.import_kind = Some((ImportKind::SideEffect, node)),
                "import.source" => mc.import_source = Some(text),
                "import.symbol" => mc.import_symbols.push(text),
                "call" => mc.call = true,
                "call.await" => mc.call_await = true,
                "call.name" => mc.call_name = Some((text, line)),
                "heritage" => {}
                "class.name" => mc.heritage_class = Some(text),
                "extends.name" => mc.extends_name = Some(text),
                "implements.name" => mc.implements_name = Some(text),
                "heritage.target" => mc.heritage_target = Some(text),
                "export.name" => mc.export_name = Some((text, line)),
                _ => {}
            }
        }

        // Entity definition
        if let (Some((kind, def_node)), Some(name)) = (mc.definition, mc.name) {
            let start_line = def_node.start_position().row as u32 + 1;
            let end_line = def_node.end_position().row as u32 + 1;
            let key = (kind, name.to_string(), start_line);
            if !seen_entities.contains_key(&key) {
                seen_entities.insert(key, result.entities.len());
                result.entities.push(ParsedEntity {
                    name: name.to_string(),
                    kind,
                    signature: signature_of(def_node, source),
                    start_line,
                    end_line,
                });
            }
        }

        // Import
        if let (Some((kind, import_node)), Some(raw_source)) = (mc.import_kind, mc.import_source) {
            let key = (import_node.start_byte(), import_node.end_byte());
            let line = import_node.start_position().row as u32 + 1;
            let entry = imports.entry(key).or_insert_with(|| ParsedImport {
                source: clean_import_source(raw_source),
                kind,
                symbols: Vec::new(),
                line,
            });
            if import_priority(kind) > import_priority(entry.kind) {
                entry.kind = kind;
            }
            for sym in &mc.import_symbols {
                if !entry.symbols.iter().any(|s| s == sym) {
                    entry.symbols.push((*sym).to_string());
                }
            }
        }

        // Call site
        if (mc.call || mc.call_await) && mc.call_name.is_some() {
            let (name, line) = mc.call_name.unwrap();
            let key = (name.to_string(), line);
            match seen_calls.get(&key) {
                Some(&idx) => {
                    if mc.call_await {
                        result.calls[idx].is_await = true;
                    }
                }
                None => {
                    seen_calls.insert(key, result.calls.len());
                    result.calls.push(ParsedCall {
                        callee: name.to_string(),
                        line,
                        is_await: mc.call_await,
                    });
                }
            }
        }

        // Heritage
        if let Some(class_name) = mc.heritage_class {
            if let Some(target) = mc.extends_name {
                push_heritage(result, class_name, target, Some(HeritageRelation::Extends));
            }
            if let Some(target) = mc.implements_name {
                push_heritage(result, class_name, target, Some(HeritageRelation::Implements));
            }
            // Undifferentiated base-list target (C#): the extractor decides
            // extends vs implements.
            if let Some(target) = mc.heritage_target {
                let target = clean_heritage_target(target);
                push_heritage(result, class_name, &target, None);
            }
        }

        // Export
        if let Some((name, line)) = mc.export_name {
            if !seen_exports.iter().any(|(n, l)| n == name && *l == line) {
                seen_exports.push((name.to_string(), line));
                result.exports.push(ParsedExport {
                    name: name.to_string(),
                    line,
                });
            }
        }
    }

    let mut imports: Vec<ParsedImport> = imports.into_values().collect();
    imports.sort_by_key(|i| i.line);
    result.imports = imports;
}

fn push_heritage(
    result: &mut ParseResult,
    class_name: &str,
    target: &str,
    relation: Option<HeritageRelation>,
) {
    let exists = result
        .heritage
        .iter()
        .any(|h| h.class_name == class_name && h.target == target && h.relation == relation);
    if !exists {
        result.heritage.push(ParsedHeritage {
            class_name: class_name.to_string(),
            target: target.to_string(),
            relation,
        });
    }
}

/// Normalize an undifferentiated heritage target: drop generic arguments and
/// namespace qualifiers, keeping the bare type name.
fn clean_heritage_target(raw: &str) -> String {
    raw.split('<')
        .next()
        .unwrap_or(raw)
        .rsplit('.')
        .next()
        .unwrap_or(raw)
        .trim()
        .to_string()
}

fn import_priority(kind: ImportKind) -> u8 {
    match kind {
        ImportKind::Named => 3,
        ImportKind::Default => 2,
        ImportKind::Namespace => 1,
        ImportKind::SideEffect => 0,
    }
}

/// Strip quoting from an import specifier (`"x"`, `'x'`, `<x>`).
fn clean_import_source(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

/// First line of a definition, bounded.
fn signature_of(node: tree_sitter::Node<'_>, source: &[u8]) -> String {
    let text = node.utf8_text(source).unwrap_or("");
    let first_line = text.lines().next().unwrap_or("").trim();
    if first_line.chars().count() > MAX_SIGNATURE_CHARS {
        first_line.chars().take(MAX_SIGNATURE_CHARS).collect()
    } else {
        first_line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(language: Language, path: &str, source: &str) -> ParseResult {
        TreeSitterBackend::parse(language, path, source, ParserLimits::default())
    }

    #[test]
    fn typescript_definitions_and_imports() {
        let source = r#"
import { readFile } from "fs";
import path from "path";
import * as os from "os";
import "./side-effects";

export function loadConfig(p: string): string {
    return readFile(p);
}

export class ConfigStore extends BaseStore {
    get(key: string): string {
        return this.lookup(key);
    }
}

interface Lookup {
    get(key: string): string;
}
"#;
        let result = parse(Language::TypeScript, "src/config.ts", source);
        assert!(result.success);

        let names: Vec<&str> = result.entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"loadConfig"));
        assert!(names.contains(&"ConfigStore"));
        assert!(names.contains(&"Lookup"));
        assert!(names.contains(&"get"));

        assert_eq!(result.imports.len(), 4);
        let named = result.imports.iter().find(|i| i.source == "fs").unwrap();
        assert_eq!(named.kind, ImportKind::Named);
        assert_eq!(named.symbols, vec!["readFile"]);
        let default = result.imports.iter().find(|i| i.source == "path").unwrap();
        assert_eq!(default.kind, ImportKind::Default);
        let ns = result.imports.iter().find(|i| i.source == "os").unwrap();
        assert_eq!(ns.kind, ImportKind::Namespace);
        let side = result
            .imports
            .iter()
            .find(|i| i.source == "./side-effects")
            .unwrap();
        assert_eq!(side.kind, ImportKind::SideEffect);
        assert!(side.symbols.is_empty());

        assert!(result
            .heritage
            .iter()
            .any(|h| h.class_name == "ConfigStore"
                && h.target == "BaseStore"
                && h.relation == Some(HeritageRelation::Extends)));

        assert!(result.calls.iter().any(|c| c.callee == "readFile"));
        assert!(result.exports.iter().any(|e| e.name == "loadConfig"));
    }

    #[test]
    fn python_entities_and_calls() {
        let source = r#"
import os
from pathlib import Path

class Walker(Base):
    def walk(self, root):
        return os.listdir(root)

def main():
    w = Walker()
    w.walk(Path("."))
"#;
        let result = parse(Language::Python, "walker.py", source);
        assert!(result.success);
        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "Walker" && e.kind == EntityKind::Class));
        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "walk" && e.kind == EntityKind::Function));
        assert!(result.imports.iter().any(|i| i.source == "os"));
        let from_import = result
            .imports
            .iter()
            .find(|i| i.source == "pathlib")
            .unwrap();
        assert_eq!(from_import.kind, ImportKind::Named);
        assert_eq!(from_import.symbols, vec!["Path"]);
        assert!(result.calls.iter().any(|c| c.callee == "listdir"));
        assert!(result
            .heritage
            .iter()
            .any(|h| h.class_name == "Walker" && h.target == "Base"));
    }

    #[test]
    fn rust_items_and_await() {
        let source = r#"
use std::io::Read;

struct Store;

trait Fetch {
    fn fetch(&self) -> u32;
}

async fn run() {
    load().await;
    helper();
}

fn helper() {}
async fn load() {}
"#;
        let result = parse(Language::Rust, "src/lib.rs", source);
        assert!(result.success);
        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "Store" && e.kind == EntityKind::Class));
        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "Fetch" && e.kind == EntityKind::Interface));
        let load_call = result.calls.iter().find(|c| c.callee == "load").unwrap();
        assert!(load_call.is_await);
        let helper_call = result.calls.iter().find(|c| c.callee == "helper").unwrap();
        assert!(!helper_call.is_await);
        assert!(result.imports.iter().any(|i| i.source == "std::io::Read"));
    }

    #[test]
    fn go_definitions() {
        let source = r#"
package main

import "fmt"

type Server struct{}

type Handler interface {
    Handle()
}

func (s *Server) Handle() {
    fmt.Println("ok")
}

func main() {
    s := &Server{}
    s.Handle()
}
"#;
        let result = parse(Language::Go, "main.go", source);
        assert!(result.success);
        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "Server" && e.kind == EntityKind::Class));
        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "Handler" && e.kind == EntityKind::Interface));
        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "Handle" && e.kind == EntityKind::Method));
        assert!(result.imports.iter().any(|i| i.source == "fmt"));
    }

    #[test]
    fn c_include_sources_are_unquoted() {
        let source = "#include <stdio.h>\n#include \"util.h\"\n\nint main(void) { return 0; }\n";
        let result = parse(Language::C, "main.c", source);
        assert!(result.success);
        assert!(result.imports.iter().any(|i| i.source == "stdio.h"));
        assert!(result.imports.iter().any(|i| i.source == "util.h"));
        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "main" && e.kind == EntityKind::Function));
    }

    #[test]
    fn csharp_definitions_usings_and_heritage() {
        let source = r#"
using System;
using System.Collections.Generic;

namespace App
{
    public class OrderService : ServiceBase, IOrderService
    {
        public void Submit(Order order)
        {
            Validate(order);
        }

        private void Validate(Order order) { }
    }

    public interface IOrderService
    {
        void Submit(Order order);
    }

    public enum Status { Open, Closed }
}
"#;
        let result = parse(Language::CSharp, "Program.cs", source);
        assert!(result.success);

        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "OrderService" && e.kind == EntityKind::Class));
        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "IOrderService" && e.kind == EntityKind::Interface));
        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "Status" && e.kind == EntityKind::Enum));
        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "Submit" && e.kind == EntityKind::Method));

        let system = result.imports.iter().find(|i| i.source == "System").unwrap();
        assert_eq!(system.kind, ImportKind::Namespace);
        assert!(result
            .imports
            .iter()
            .any(|i| i.source == "System.Collections.Generic"));

        // Base-list targets come back undifferentiated; the extractor splits
        // extends from implements.
        assert!(result.heritage.iter().any(|h| h.class_name == "OrderService"
            && h.target == "ServiceBase"
            && h.relation.is_none()));
        assert!(result.heritage.iter().any(|h| h.class_name == "OrderService"
            && h.target == "IOrderService"
            && h.relation.is_none()));

        assert!(result.calls.iter().any(|c| c.callee == "Validate"));
    }

    #[test]
    fn csharp_await_marks_call_async() {
        let source = r#"
class Client
{
    async Task Run()
    {
        await FetchAsync();
        Log();
    }
}
"#;
        let result = parse(Language::CSharp, "Client.cs", source);
        let fetch = result.calls.iter().find(|c| c.callee == "FetchAsync").unwrap();
        assert!(fetch.is_await);
        let log = result.calls.iter().find(|c| c.callee == "Log").unwrap();
        assert!(!log.is_await);
    }

    #[test]
    fn heritage_targets_are_normalized() {
        assert_eq!(clean_heritage_target("ServiceBase"), "ServiceBase");
        assert_eq!(clean_heritage_target("App.Core.ServiceBase"), "ServiceBase");
        assert_eq!(clean_heritage_target("IRepository<Order>"), "IRepository");
    }

    #[test]
    fn syntax_errors_are_diagnostics_not_failures() {
        let result = parse(Language::Python, "broken.py", "def broken(:\n");
        assert!(result.success);
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn deterministic_extraction() {
        let source = "function a() {}\nfunction b() { a(); }\n";
        let one = parse(Language::JavaScript, "x.js", source);
        let two = parse(Language::JavaScript, "x.js", source);
        assert_eq!(one.entities, two.entities);
        assert_eq!(one.calls, two.calls);
        assert_eq!(one.imports, two.imports);
    }
}
