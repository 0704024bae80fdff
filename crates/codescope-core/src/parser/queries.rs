//! Embedded tree-sitter queries for the AST backend.
//!
//! Queries are embedded at compile time so the binary works without external
//! query files. Capture naming convention shared by every language:
//!
//! - `definition.<kind>` + `name.definition.<kind>` — entity definitions
//! - `import.<kind>` + `import.source` + `import.symbol` — module imports
//! - `call` / `call.await` + `call.name` — call sites
//! - `heritage` + `class.name` + `extends.name` / `implements.name`, or
//!   `heritage.target` where the syntax does not distinguish the two
//! - `export.name` — exported symbols

use super::Language;

const TYPESCRIPT_TAGS: &str = include_str!("../../queries/typescript-tags.scm");
const JAVASCRIPT_TAGS: &str = include_str!("../../queries/javascript-tags.scm");
const PYTHON_TAGS: &str = include_str!("../../queries/python-tags.scm");
const JAVA_TAGS: &str = include_str!("../../queries/java-tags.scm");
const GO_TAGS: &str = include_str!("../../queries/go-tags.scm");
const RUST_TAGS: &str = include_str!("../../queries/rust-tags.scm");
const C_TAGS: &str = include_str!("../../queries/c-tags.scm");
const CPP_TAGS: &str = include_str!("../../queries/cpp-tags.scm");
const RUBY_TAGS: &str = include_str!("../../queries/ruby-tags.scm");
const CSHARP_TAGS: &str = include_str!("../../queries/csharp-tags.scm");

/// Get the embedded query source for a language.
///
/// TSX shares the TypeScript queries.
pub fn get_query(language: Language) -> Option<&'static str> {
    match language {
        Language::TypeScript | Language::Tsx => Some(TYPESCRIPT_TAGS),
        Language::JavaScript => Some(JAVASCRIPT_TAGS),
        Language::Python => Some(PYTHON_TAGS),
        Language::Java => Some(JAVA_TAGS),
        Language::Go => Some(GO_TAGS),
        Language::Rust => Some(RUST_TAGS),
        Language::C => Some(C_TAGS),
        Language::Cpp => Some(CPP_TAGS),
        Language::Ruby => Some(RUBY_TAGS),
        Language::CSharp => Some(CSHARP_TAGS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_language_has_a_query() {
        for lang in [
            Language::TypeScript,
            Language::Tsx,
            Language::JavaScript,
            Language::Python,
            Language::Java,
            Language::Go,
            Language::Rust,
            Language::C,
            Language::Cpp,
            Language::Ruby,
            Language::CSharp,
        ] {
            assert!(get_query(lang).is_some(), "missing query for {lang}");
        }
    }
}
