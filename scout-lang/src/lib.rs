//! Language layer for Scout: the plugin contract, built-in plugins, and the
//! signature and reflected-value models they share with the engine.

pub mod languages;
pub mod signature;
pub mod value;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use languages::{LanguagePlugin, TestOptions};
pub use signature::{Kind, NamePattern, Signature, SignatureInput};
pub use value::{Access, AccessKind, ModuleExports, ResolvedTarget, Value};

/// Error type for the language layer.
#[derive(thiserror::Error, Debug)]
pub enum LangError {
    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Tree-sitter error: {0}")]
    TreeSitter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LangError>;

// ── Span type ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextRange {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_row: usize,
    pub start_col: usize,
    pub end_row: usize,
    pub end_col: usize,
}

impl From<tree_sitter::Range> for TextRange {
    fn from(r: tree_sitter::Range) -> Self {
        Self {
            start_byte: r.start_byte,
            end_byte: r.end_byte,
            start_row: r.start_point.row,
            start_col: r.start_point.column,
            end_row: r.end_point.row,
            end_col: r.end_point.column,
        }
    }
}

// ── Static metadata ────────────────────────────────────────────────

/// How an entity is reachable from outside its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    /// Reachable under its own (or an aliased) name.
    Named,
    /// The module's default export (`export default`, `module.exports = X`).
    Default,
}

/// A named entity found by static analysis of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    /// Dotted path including enclosing modules, e.g. `shapes.Circle`.
    pub qualified_name: String,
    pub kind: Kind,
    pub methods: Vec<String>,
    pub static_methods: Vec<String>,
    pub properties: Vec<String>,
    /// Direct superclass (or embedded type for Go).
    pub extends: Option<String>,
    /// Interfaces or traits the entity declares it implements.
    pub implements: Vec<String>,
    pub params: Vec<String>,
    /// Constructor name when the entity is an instance (`new Foo()`, `Foo()`).
    pub instance_of: Option<String>,
    pub export: Option<ExportKind>,
    /// Name the entity is exported under when it differs from `name`.
    pub export_alias: Option<String>,
    pub span: TextRange,
}

impl Entity {
    pub fn new(name: impl Into<String>, kind: Kind, span: TextRange) -> Self {
        let name = name.into();
        Self {
            qualified_name: name.clone(),
            name,
            kind,
            methods: Vec::new(),
            static_methods: Vec::new(),
            properties: Vec::new(),
            extends: None,
            implements: Vec::new(),
            params: Vec::new(),
            instance_of: None,
            export: None,
            export_alias: None,
            span,
        }
    }

    /// The name this entity is visible under from other modules.
    pub fn exported_name(&self) -> &str {
        self.export_alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_exported(&self) -> bool {
        self.export.is_some()
    }
}

/// Everything a plugin learned about one file without executing it.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub path: PathBuf,
    pub language: &'static str,
    pub entities: Vec<Entity>,
    pub imports: Vec<String>,
    /// Every identifier and member name mentioned in the file.
    pub identifiers: BTreeSet<String>,
    pub source: Arc<str>,
    pub content_hash: u64,
}

impl FileMetadata {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn default_export(&self) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.export == Some(ExportKind::Default))
    }

    /// File name without directories or extensions (`Calculator.test.js` → `Calculator.test`).
    pub fn module_name(&self) -> String {
        self.path
            .file_stem()
            .map_or_else(String::new, |s| s.to_string_lossy().to_string())
    }
}

/// A raw candidate extracted from file metadata, before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDescriptor {
    pub name: String,
    pub qualified_name: String,
    pub kind: Kind,
    pub export: Option<ExportKind>,
    pub export_name: Option<String>,
    pub methods: Vec<String>,
    pub properties: Vec<String>,
    pub extends: Option<String>,
    /// `true` for the synthetic whole-module descriptor.
    pub module_level: bool,
}

impl CandidateDescriptor {
    pub fn from_entity(entity: &Entity) -> Self {
        let mut methods = entity.methods.clone();
        methods.extend(entity.static_methods.iter().cloned());
        Self {
            name: entity.name.clone(),
            qualified_name: entity.qualified_name.clone(),
            kind: entity.kind,
            export: entity.export,
            export_name: entity.export.map(|_| entity.exported_name().to_string()),
            methods,
            properties: entity.properties.clone(),
            extends: entity.extends.clone(),
            module_level: false,
        }
    }

    /// Every member name the descriptor declares.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.methods
            .iter()
            .chain(self.properties.iter())
            .map(String::as_str)
    }
}

/// Compute a content hash for a byte slice.
///
/// FNV-1a 64-bit; collisions are acceptable since this only detects change.
pub fn content_hash(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}
