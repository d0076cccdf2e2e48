pub mod ecma;
pub mod go;
mod helpers;
pub mod javascript;
pub mod python;
pub mod rust;
pub mod typescript;

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

use lru::LruCache;
use regex::Regex;
use tracing::debug;

use crate::signature::{Kind, Signature};
use crate::value::{ModuleExports, ResolvedTarget};
use crate::{CandidateDescriptor, FileMetadata, LangError, Result, content_hash};

/// Default number of parsed files each plugin keeps.
pub const DEFAULT_PARSE_CACHE_SIZE: usize = 256;

/// Options for test scaffolding output.
#[derive(Debug, Clone)]
pub struct TestOptions {
    /// Module the generated test imports `discover` from.
    pub discovery_module: String,
    /// Emit one stub per signature method.
    pub method_stubs: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            discovery_module: "scout".to_string(),
            method_stubs: true,
        }
    }
}

/// Trait implemented by each language's discovery support.
///
/// Plugins never evaluate the code they read: metadata comes from
/// tree-sitter, and the built-in `load_module` reflects the export surface
/// from that metadata.
pub trait LanguagePlugin: Send + Sync + std::fmt::Debug {
    /// Language identifier (e.g., "javascript", "python").
    fn id(&self) -> &'static str;

    /// File extensions this language handles, native extension first.
    fn extensions(&self) -> &'static [&'static str];

    /// File names this plugin never scans even when the extension matches.
    fn skip_patterns(&self) -> &[Regex];

    /// Tree-sitter language for parsing.
    fn tree_sitter_language(&self, path: &Path) -> tree_sitter::Language;

    /// Bounded cache of parsed files.
    fn parse_cache(&self) -> &ParseCache;

    /// Build metadata from a parsed tree.
    fn extract_metadata(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        path: &Path,
    ) -> Result<FileMetadata>;

    /// Reflect the module's export surface from its metadata.
    fn reflect_exports(&self, metadata: &FileMetadata) -> ModuleExports;

    /// Scaffold test text for a resolved target. Must not panic.
    fn generate_test_content(&self, target: &ResolvedTarget, options: &TestOptions) -> String;

    /// Content patterns that make a file unsafe to load in this language.
    fn unsafe_patterns(&self) -> &'static [&'static str] {
        &[]
    }

    /// Extension and skip-pattern gate; performs no I/O.
    fn should_scan_file(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        if !self.extensions().contains(&ext.as_str()) {
            return false;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        !self.skip_patterns().iter().any(|p| p.is_match(&file_name))
    }

    /// Read and parse a file, consulting the parse cache first.
    fn parse_file(&self, path: &Path) -> Result<Arc<FileMetadata>> {
        let stat = std::fs::metadata(path)?;
        let stamp = FileStamp::from_metadata(&stat);
        if let Some(hit) = self.parse_cache().get(path, stamp) {
            return Ok(hit);
        }

        let source = std::fs::read_to_string(path)?;
        let metadata = Arc::new(self.parse_source(&source, path)?);
        self.parse_cache()
            .insert(path.to_path_buf(), stamp, Arc::clone(&metadata));
        Ok(metadata)
    }

    /// Parse source text. Syntax errors are reported, never panicked on.
    fn parse_source(&self, source: &str, path: &Path) -> Result<FileMetadata> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&self.tree_sitter_language(path))
            .map_err(|e| LangError::TreeSitter(e.to_string()))?;
        let tree = parser.parse(source, None).ok_or_else(|| LangError::Parse {
            path: path.display().to_string(),
            message: "parser returned no tree".to_string(),
        })?;

        let root = tree.root_node();
        if root.has_error() {
            let message = helpers::first_error(root)
                .map_or_else(
                    || "syntax error".to_string(),
                    |n| {
                        format!(
                            "syntax error at {}:{}",
                            n.start_position().row + 1,
                            n.start_position().column + 1
                        )
                    },
                );
            debug!(path = %path.display(), %message, "Parse failed");
            return Err(LangError::Parse {
                path: path.display().to_string(),
                message,
            });
        }

        self.extract_metadata(&tree, source, path)
    }

    /// One descriptor per top-level entity, plus the whole module.
    fn extract_candidates(&self, metadata: &FileMetadata) -> Vec<CandidateDescriptor> {
        let mut candidates: Vec<CandidateDescriptor> = metadata
            .entities
            .iter()
            .filter(|e| !e.qualified_name.contains('.') || e.is_exported())
            .map(CandidateDescriptor::from_entity)
            .collect();

        let exported: Vec<String> = metadata
            .entities
            .iter()
            .filter(|e| e.is_exported())
            .map(|e| e.exported_name().to_string())
            .collect();
        let module_name = metadata.module_name();
        candidates.push(CandidateDescriptor {
            qualified_name: module_name.clone(),
            name: module_name,
            kind: Kind::Module,
            export: None,
            export_name: None,
            methods: exported,
            properties: Vec::new(),
            extends: None,
            module_level: true,
        });
        candidates
    }

    /// Additive, language-aware adjustment on top of the generic score.
    fn score_language_specific(
        &self,
        candidate: &CandidateDescriptor,
        signature: &Signature,
    ) -> f64 {
        entity_name_bonus(candidate, signature) + export_bonus(candidate, signature)
    }

    /// Obtain the module's export surface. Built-in plugins reflect it from
    /// static metadata.
    fn load_module(&self, path: &Path) -> Result<ModuleExports> {
        let metadata = self.parse_file(path)?;
        Ok(self.reflect_exports(&metadata))
    }
}

/// Bonus when the entity itself (not just the file) carries the wanted name.
pub fn entity_name_bonus(candidate: &CandidateDescriptor, signature: &Signature) -> f64 {
    let Some(name) = signature.name() else {
        return 0.0;
    };
    if candidate.module_level && signature.kind() != Some(Kind::Module) {
        return 0.0;
    }
    if !signature.kind_matches(candidate.kind) {
        return 0.0;
    }
    let export_name = candidate.export_name.as_deref().unwrap_or(&candidate.name);
    if name.is_match(&candidate.name) || name.is_match(export_name) {
        20.0
    } else if name.matches_ignore_case(&candidate.name) {
        10.0
    } else {
        0.0
    }
}

/// Bonus for reachable entities; larger when the requested export name matches.
pub fn export_bonus(candidate: &CandidateDescriptor, signature: &Signature) -> f64 {
    match (&candidate.export_name, signature.exports()) {
        (Some(exported), Some(wanted)) if exported == wanted => 10.0,
        (Some(_), _) => 3.0,
        (None, _) => 0.0,
    }
}

// ── Parse cache ────────────────────────────────────────────────────

/// Cheap freshness stamp for a file: modification time and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub mtime_ms: u128,
    pub size: u64,
}

impl FileStamp {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_millis());
        Self {
            mtime_ms,
            size: meta.len(),
        }
    }
}

/// LRU cache of parsed files keyed by path and validated by [`FileStamp`]
/// and content hash.
#[derive(Debug)]
pub struct ParseCache {
    entries: Mutex<LruCache<PathBuf, (FileStamp, Arc<FileMetadata>)>>,
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, path: &Path, stamp: FileStamp) -> Option<Arc<FileMetadata>> {
        let mut entries = self.entries.lock().expect("parse cache mutex poisoned");
        let cached = entries
            .get(path)
            .map(|(cached, metadata)| (*cached, Arc::clone(metadata)));
        match cached {
            Some((cached, metadata)) if cached == stamp => Some(metadata),
            Some(_) => {
                entries.pop(path);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, path: PathBuf, stamp: FileStamp, metadata: Arc<FileMetadata>) {
        self.entries
            .lock()
            .expect("parse cache mutex poisoned")
            .put(path, (stamp, metadata));
    }

    /// Drop a cached parse whose content no longer matches `hash`.
    pub fn invalidate_if_changed(&self, path: &Path, hash: u64) {
        let mut entries = self.entries.lock().expect("parse cache mutex poisoned");
        if entries
            .peek(path)
            .is_some_and(|(_, m)| m.content_hash != hash)
        {
            entries.pop(path);
        }
    }

    pub fn remove(&self, path: &Path) {
        self.entries
            .lock()
            .expect("parse cache mutex poisoned")
            .pop(path);
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("parse cache mutex poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("parse cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ParseCache {
    fn default() -> Self {
        Self::new(DEFAULT_PARSE_CACHE_SIZE)
    }
}

/// Hash source text the same way the parse cache does.
pub fn source_hash(source: &str) -> u64 {
    content_hash(source.as_bytes())
}

/// All built-in plugins, each with its own parse cache of `cache_size` entries.
pub fn builtin_plugins(cache_size: usize) -> Vec<Arc<dyn LanguagePlugin>> {
    vec![
        Arc::new(javascript::JavaScriptPlugin::with_cache_size(cache_size)),
        Arc::new(typescript::TypeScriptPlugin::with_cache_size(cache_size)),
        Arc::new(python::PythonPlugin::with_cache_size(cache_size)),
        Arc::new(rust::RustPlugin::with_cache_size(cache_size)),
        Arc::new(go::GoPlugin::with_cache_size(cache_size)),
    ]
}
