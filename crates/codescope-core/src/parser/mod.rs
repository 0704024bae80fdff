//! Language-dispatched source parsing.
//!
//! Files are routed by extension into the tree-sitter backend
//! ([`backend`]), which drives one per-language capture query (under
//! `queries/`) through a shared extraction loop. Supported: TypeScript/TSX,
//! JavaScript/JSX, Python, Java, Go, Rust, C, C++, Ruby and C#.
//!
//! Every file yields the uniform [`ParseResult`]. Size and timeout
//! violations are recoverable: they are recorded in the result, never
//! raised.

mod backend;
mod queries;

pub use backend::TreeSitterBackend;

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::model::ImportKind;

// ============================================================================
// Supported Languages
// ============================================================================

/// Languages the parser router understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Java,
    Go,
    Rust,
    C,
    Cpp,
    Ruby,
    CSharp,
}

impl Language {
    /// Language name as reported in parse results.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::CSharp => "csharp",
        }
    }

    /// Detect language from a file extension (lowercased, without dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "js" | "mjs" | "cjs" | "jsx" => Some(Language::JavaScript),
            "py" => Some(Language::Python),
            "java" => Some(Language::Java),
            "go" => Some(Language::Go),
            "rs" => Some(Language::Rust),
            "c" | "h" => Some(Language::C),
            "cpp" | "hpp" | "cc" | "cxx" | "hh" => Some(Language::Cpp),
            "rb" => Some(Language::Ruby),
            "cs" => Some(Language::CSharp),
            _ => None,
        }
    }

    /// Detect language from a file path.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// All file extensions the router accepts.
    pub fn all_extensions() -> &'static [&'static str] {
        &[
            "ts", "mts", "cts", "tsx", "js", "mjs", "cjs", "jsx", "py", "java", "go", "rs", "c",
            "h", "cpp", "hpp", "cc", "cxx", "hh", "rb", "cs",
        ]
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Parse result types
// ============================================================================

/// Kind of a parsed code entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Function,
    Method,
    Class,
    Interface,
    Enum,
    Type,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Function => "function",
            EntityKind::Method => "method",
            EntityKind::Class => "class",
            EntityKind::Interface => "interface",
            EntityKind::Enum => "enum",
            EntityKind::Type => "type",
        }
    }

    /// Whether this entity is callable (maps to a Function graph node).
    pub fn is_callable(&self) -> bool {
        matches!(self, EntityKind::Function | EntityKind::Method)
    }
}

/// A named definition found in a source file. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEntity {
    pub name: String,
    pub kind: EntityKind,
    /// First line of the definition, trimmed.
    pub signature: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// A module import found in a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedImport {
    /// Raw import source (module specifier, path, or use-path).
    pub source: String,
    pub kind: ImportKind,
    /// Imported symbol names, empty for side-effect imports.
    pub symbols: Vec<String>,
    pub line: u32,
}

/// An exported symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedExport {
    pub name: String,
    pub line: u32,
}

/// A call site. `callee` is the bare called name; resolution to a concrete
/// target happens during graph ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCall {
    pub callee: String,
    pub line: u32,
    pub is_await: bool,
}

/// Class inheritance relation found in a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedHeritage {
    /// Name of the subclass/implementor.
    pub class_name: String,
    /// Name of the extended/implemented type.
    pub target: String,
    /// `None` when the syntax does not distinguish extends from implements
    /// (C# base lists); the extractor decides by naming convention.
    pub relation: Option<HeritageRelation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeritageRelation {
    Extends,
    Implements,
}

/// A recoverable problem encountered while parsing one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    pub message: String,
    pub line: Option<u32>,
}

impl ParseDiagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
        }
    }
}

/// Uniform output of the parser backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub file_path: String,
    pub language: Language,
    pub entities: Vec<ParsedEntity>,
    pub imports: Vec<ParsedImport>,
    pub exports: Vec<ParsedExport>,
    pub calls: Vec<ParsedCall>,
    pub heritage: Vec<ParsedHeritage>,
    pub errors: Vec<ParseDiagnostic>,
    pub parse_time_ms: u64,
    pub success: bool,
}

impl ParseResult {
    /// An empty result carrying a single recoverable error.
    pub fn failed(file_path: impl Into<String>, language: Language, message: String) -> Self {
        Self {
            file_path: file_path.into(),
            language,
            entities: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            calls: Vec::new(),
            heritage: Vec::new(),
            errors: vec![ParseDiagnostic::new(message)],
            parse_time_ms: 0,
            success: false,
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Per-file parse limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParserLimits {
    pub max_file_size_bytes: u64,
    pub parse_timeout_ms: u64,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 1024 * 1024,
            parse_timeout_ms: 5_000,
        }
    }
}

/// Routes files by extension to the backend with the right grammar.
///
/// The router itself is cheap to construct; grammar and query state is cached
/// process-wide inside the backend and initialized at most once per language.
#[derive(Debug, Clone, Default)]
pub struct ParserRouter {
    limits: ParserLimits,
}

impl ParserRouter {
    pub fn new(limits: ParserLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ParserLimits {
        self.limits
    }

    /// Whether a path routes to a backend at all.
    pub fn supports(&self, path: &Path) -> bool {
        Language::from_path(path).is_some()
    }

    /// Parse already-read file content.
    ///
    /// `file_path` is the repository-relative POSIX path and is echoed into
    /// the result. Unsupported extensions, oversized files and timeouts all
    /// come back as failed results, not errors.
    pub fn parse_content(&self, file_path: &str, content: &str) -> ParseResult {
        let Some(language) = Language::from_path(Path::new(file_path)) else {
            return ParseResult::failed(
                file_path,
                Language::JavaScript,
                format!("unsupported file extension: {file_path}"),
            );
        };

        let size = content.len() as u64;
        if size > self.limits.max_file_size_bytes {
            return ParseResult::failed(
                file_path,
                language,
                format!(
                    "file too large: {size} bytes (limit {})",
                    self.limits.max_file_size_bytes
                ),
            );
        }

        let start = Instant::now();
        let mut result = TreeSitterBackend::parse(language, file_path, content, self.limits);
        result.parse_time_ms = start.elapsed().as_millis() as u64;
        result
    }

    /// Read a file under `root` and parse it.
    pub fn parse_file(&self, root: &Path, relative_path: &str) -> ParseResult {
        let abs = root.join(relative_path);
        match std::fs::read_to_string(&abs) {
            Ok(content) => self.parse_content(relative_path, &content),
            Err(e) => {
                let language =
                    Language::from_path(Path::new(relative_path)).unwrap_or(Language::JavaScript);
                ParseResult::failed(relative_path, language, format!("read failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_routing() {
        assert_eq!(Language::from_extension("ts"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension("TSX"), Some(Language::Tsx));
        assert_eq!(Language::from_extension("jsx"), Some(Language::JavaScript));
        assert_eq!(Language::from_extension("rb"), Some(Language::Ruby));
        assert_eq!(Language::from_extension("cs"), Some(Language::CSharp));
        assert_eq!(Language::from_extension("txt"), None);
    }

    #[test]
    fn oversized_file_is_recoverable() {
        let router = ParserRouter::new(ParserLimits {
            max_file_size_bytes: 8,
            parse_timeout_ms: 1_000,
        });
        let result = router.parse_content("big.py", "def f():\n    pass\n");
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("too large"));
    }

    #[test]
    fn unsupported_extension_is_recoverable() {
        let router = ParserRouter::default();
        let result = router.parse_content("notes.txt", "hello");
        assert!(!result.success);
        assert!(result.errors[0].message.contains("unsupported"));
    }

    #[test]
    fn file_exactly_at_limit_is_accepted() {
        let source = "def f():\n    pass\n";
        let router = ParserRouter::new(ParserLimits {
            max_file_size_bytes: source.len() as u64,
            parse_timeout_ms: 1_000,
        });
        let result = router.parse_content("ok.py", source);
        assert!(result.success);
    }
}
