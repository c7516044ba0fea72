//! Per-file symbol extraction: grammar-based syntax parsing plus one
//! declarative pattern query per language.
//!
//! The rest of the pipeline treats this module as a pure function
//! `extract(bytes, language_id) -> occurrences`. Malformed source never
//! fails extraction; it degrades to a best-effort (possibly empty) set.

use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tree_sitter::{Language, Parser, Query, QueryCursor, StreamingIterator};

/// Coarse classification of what a word *is* at an occurrence site.
///
/// The `u8` codes are part of the persisted index format; never reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Interface,
    Field,
    Variable,
    Constant,
    Module,
}

impl SymbolKind {
    pub fn code(self) -> u8 {
        match self {
            SymbolKind::Function => 0,
            SymbolKind::Method => 1,
            SymbolKind::Class => 2,
            SymbolKind::Struct => 3,
            SymbolKind::Enum => 4,
            SymbolKind::Interface => 5,
            SymbolKind::Field => 6,
            SymbolKind::Variable => 7,
            SymbolKind::Constant => 8,
            SymbolKind::Module => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => SymbolKind::Function,
            1 => SymbolKind::Method,
            2 => SymbolKind::Class,
            3 => SymbolKind::Struct,
            4 => SymbolKind::Enum,
            5 => SymbolKind::Interface,
            6 => SymbolKind::Field,
            7 => SymbolKind::Variable,
            8 => SymbolKind::Constant,
            9 => SymbolKind::Module,
            _ => return None,
        })
    }
}

/// Whether an occurrence introduces the word or merely refers to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    Definition,
    Usage,
}

/// One recorded appearance of an identifier in one file.
///
/// Occurrences are aggregated into per-file symbol tables and never
/// persisted individually.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub word: String,
    pub kind: SymbolKind,
    pub role: Role,
}

pub trait LanguageDriver: Send + Sync {
    fn id(&self) -> &'static str;
    /// Primary file extensions handled by this driver (lowercase, without dot).
    fn extensions(&self) -> &'static [&'static str];
    fn language(&self, path_hint: Option<&Path>) -> Language;
    /// Declarative query whose capture names encode role and kind,
    /// e.g. `@def.function` or `@usage.call`.
    fn query_source(&self) -> &'static str;
}

struct RustDriver;
impl LanguageDriver for RustDriver {
    fn id(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn language(&self, _path_hint: Option<&Path>) -> Language {
        tree_sitter_rust::language()
    }

    fn query_source(&self) -> &'static str {
        include_str!("../queries/rust_symbols.scm")
    }
}

struct TypeScriptDriver;
impl LanguageDriver for TypeScriptDriver {
    fn id(&self) -> &'static str {
        "typescript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"]
    }

    fn language(&self, path_hint: Option<&Path>) -> Language {
        let ext = path_hint.map(path_ext_lower).unwrap_or_default();
        if ext == "tsx" || ext == "jsx" {
            tree_sitter_typescript::language_tsx()
        } else {
            // JS/TS share the TypeScript grammar for our purposes.
            tree_sitter_typescript::language_typescript()
        }
    }

    fn query_source(&self) -> &'static str {
        include_str!("../queries/typescript_symbols.scm")
    }
}

struct PythonDriver;
impl LanguageDriver for PythonDriver {
    fn id(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }

    fn language(&self, _path_hint: Option<&Path>) -> Language {
        tree_sitter_python::language()
    }

    fn query_source(&self) -> &'static str {
        include_str!("../queries/python_symbols.scm")
    }
}

struct GoDriver;
impl LanguageDriver for GoDriver {
    fn id(&self) -> &'static str {
        "go"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn language(&self, _path_hint: Option<&Path>) -> Language {
        tree_sitter_go::language()
    }

    fn query_source(&self) -> &'static str {
        include_str!("../queries/go_symbols.scm")
    }
}

pub struct LanguageRegistry {
    drivers: Vec<Box<dyn LanguageDriver>>,
    by_ext: HashMap<String, usize>,
}

impl LanguageRegistry {
    pub fn driver_for_id(&self, id: &str) -> Option<&dyn LanguageDriver> {
        self.drivers.iter().find(|d| d.id() == id).map(|d| d.as_ref())
    }

    pub fn driver_for_path(&self, path: &Path) -> Option<&dyn LanguageDriver> {
        let ext = path_ext_lower(path);
        self.by_ext.get(&ext).map(|&idx| self.drivers[idx].as_ref())
    }

    /// All extensions covered by the given enabled-language set.
    pub fn extensions_for(&self, language_ids: &[String]) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = Vec::new();
        for d in &self.drivers {
            if language_ids.iter().any(|id| id == d.id()) {
                out.extend_from_slice(d.extensions());
            }
        }
        out
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        let drivers: Vec<Box<dyn LanguageDriver>> = vec![
            Box::new(RustDriver),
            Box::new(TypeScriptDriver),
            Box::new(PythonDriver),
            Box::new(GoDriver),
        ];

        let mut reg = Self {
            drivers,
            by_ext: HashMap::new(),
        };

        for (idx, d) in reg.drivers.iter().enumerate() {
            for ext in d.extensions() {
                reg.by_ext.insert(ext.to_string(), idx);
            }
        }

        reg
    }
}

pub fn registry() -> &'static LanguageRegistry {
    static REG: OnceLock<LanguageRegistry> = OnceLock::new();
    REG.get_or_init(LanguageRegistry::default)
}

/// Language id for a path, or None when no enabled driver covers it.
pub fn language_id_for_path(path: &Path) -> Option<&'static str> {
    registry().driver_for_path(path).map(|d| d.id())
}

fn path_ext_lower(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Map a query capture name to an occurrence role and kind.
///
/// Capture names follow `<role>.<kind>`; `usage.call` marks a call site
/// (kind Function) and `usage.constructor` an instantiation (kind Class).
fn capture_role_kind(cap_name: &str) -> Option<(Role, SymbolKind)> {
    let (role_str, kind_str) = cap_name.split_once('.')?;
    let role = match role_str {
        "def" => Role::Definition,
        "usage" => Role::Usage,
        _ => return None,
    };
    let kind = match kind_str {
        "function" => SymbolKind::Function,
        "method" => SymbolKind::Method,
        "class" => SymbolKind::Class,
        "struct" => SymbolKind::Struct,
        "enum" => SymbolKind::Enum,
        "interface" => SymbolKind::Interface,
        "field" => SymbolKind::Field,
        "variable" => SymbolKind::Variable,
        "constant" => SymbolKind::Constant,
        "module" => SymbolKind::Module,
        "call" => SymbolKind::Function,
        "constructor" => SymbolKind::Class,
        _ => return None,
    };
    Some((role, kind))
}

/// Extract all symbol occurrences from one file.
///
/// Deterministic for identical input. Unknown language ids, parse failures
/// and query trouble all yield an empty set; per-file extraction must never
/// abort indexing of the rest of the workspace.
pub fn extract(bytes: &[u8], language_id: &str, path_hint: Option<&Path>) -> Vec<Occurrence> {
    let Some(driver) = registry().driver_for_id(language_id) else {
        return vec![];
    };
    let language = driver.language(path_hint);

    let mut parser = Parser::new();
    if parser.set_language(&language).is_err() {
        debug_log_extract_failure(language_id, "grammar rejected by parser");
        return vec![];
    }

    let Some(tree) = parser.parse(bytes, None) else {
        debug_log_extract_failure(language_id, "parse returned no tree");
        return vec![];
    };
    let root = tree.root_node();

    let query = match Query::new(&language, driver.query_source()) {
        Ok(q) => q,
        Err(_e) => {
            debug_log_extract_failure(language_id, "query failed to compile");
            return vec![];
        }
    };

    let mut cursor = QueryCursor::new();
    let mut out: Vec<Occurrence> = Vec::new();

    let mut matches = cursor.matches(&query, root, bytes);
    while let Some(m) = matches.next() {
        for cap in m.captures {
            let cap_name = query.capture_names()[cap.index as usize];
            let Some((role, kind)) = capture_role_kind(cap_name) else {
                continue;
            };

            let start = cap.node.start_byte();
            let end = cap.node.end_byte();
            let word = std::str::from_utf8(&bytes[start..end])
                .unwrap_or("")
                .trim()
                .to_string();
            if word.is_empty() {
                continue;
            }

            out.push(Occurrence { word, kind, role });
        }
    }

    out
}

fn debug_log_extract_failure(_language_id: &str, _reason: &str) {
    crate::debug_log!("[polysym] extraction skipped ({_language_id}): {_reason}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has(occs: &[Occurrence], word: &str, kind: SymbolKind, role: Role) -> bool {
        occs.iter()
            .any(|o| o.word == word && o.kind == kind && o.role == role)
    }

    #[test]
    fn rust_definitions_and_calls() {
        let src = br#"
pub struct Engine {
    speed: u32,
}

pub fn start() {
    ignite();
}
"#;
        let occs = extract(src, "rust", None);
        assert!(has(&occs, "Engine", SymbolKind::Struct, Role::Definition));
        assert!(has(&occs, "speed", SymbolKind::Field, Role::Definition));
        assert!(has(&occs, "start", SymbolKind::Function, Role::Definition));
        assert!(has(&occs, "ignite", SymbolKind::Function, Role::Usage));
    }

    #[test]
    fn go_function_definition_and_call() {
        let src = b"package main\n\nfunc Foo() {\n\tBar()\n}\n";
        let occs = extract(src, "go", None);
        assert!(has(&occs, "Foo", SymbolKind::Function, Role::Definition));
        assert!(has(&occs, "Bar", SymbolKind::Function, Role::Usage));
        assert!(!has(&occs, "Bar", SymbolKind::Function, Role::Definition));
    }

    #[test]
    fn typescript_class_and_method() {
        let src = br#"
class Greeter {
    greet() {
        console.log("hi");
    }
}
const g = new Greeter();
"#;
        let occs = extract(src, "typescript", None);
        assert!(has(&occs, "Greeter", SymbolKind::Class, Role::Definition));
        assert!(has(&occs, "greet", SymbolKind::Method, Role::Definition));
        assert!(has(&occs, "Greeter", SymbolKind::Class, Role::Usage));
        assert!(has(&occs, "log", SymbolKind::Function, Role::Usage));
    }

    #[test]
    fn python_definitions() {
        let src = b"class Parser:\n    def parse(self):\n        tokenize()\n";
        let occs = extract(src, "python", None);
        assert!(has(&occs, "Parser", SymbolKind::Class, Role::Definition));
        assert!(has(&occs, "parse", SymbolKind::Function, Role::Definition));
        assert!(has(&occs, "tokenize", SymbolKind::Function, Role::Usage));
    }

    #[test]
    fn malformed_source_degrades_to_best_effort() {
        // Tree-sitter recovers from syntax errors; whatever it can still
        // recognize is kept, and nothing panics.
        let src = b"fn good() {} fn {{{{ nonsense";
        let occs = extract(src, "rust", None);
        assert!(has(&occs, "good", SymbolKind::Function, Role::Definition));
    }

    #[test]
    fn unknown_language_yields_empty() {
        assert!(extract(b"fn x() {}", "cobol", None).is_empty());
    }

    #[test]
    fn extension_routing() {
        use std::path::Path;
        assert_eq!(language_id_for_path(Path::new("a/b.rs")), Some("rust"));
        assert_eq!(language_id_for_path(Path::new("x.tsx")), Some("typescript"));
        assert_eq!(language_id_for_path(Path::new("m.go")), Some("go"));
        assert_eq!(language_id_for_path(Path::new("notes.md")), None);
    }
}
