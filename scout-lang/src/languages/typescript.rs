use std::path::Path;

use regex::Regex;

use crate::value::{ModuleExports, ResolvedTarget};
use crate::{FileMetadata, Result};

use super::{DEFAULT_PARSE_CACHE_SIZE, LanguagePlugin, ParseCache, TestOptions, ecma};

const UNSAFE_PATTERNS: &[&str] = &[
    r"\bprocess\.(exit|kill|abort)\s*\(",
    r#"from\s+['"](node:)?child_process['"]"#,
    r#"require\(\s*['"](node:)?child_process['"]\s*\)"#,
    r"\b(execSync|spawnSync|execFileSync)\s*\(",
    r"\bfs\.(rmSync|rmdirSync|unlinkSync)\s*\(",
    r"\.listen\s*\(\s*(\d+|port\b|PORT\b)",
];

#[derive(Debug)]
pub struct TypeScriptPlugin {
    skip: Vec<Regex>,
    cache: ParseCache,
}

impl TypeScriptPlugin {
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_PARSE_CACHE_SIZE)
    }

    pub fn with_cache_size(cache_size: usize) -> Self {
        // Declaration files carry no implementation to load.
        let skip = [r"\.d\.ts$"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self {
            skip,
            cache: ParseCache::new(cache_size),
        }
    }
}

impl Default for TypeScriptPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguagePlugin for TypeScriptPlugin {
    fn id(&self) -> &'static str {
        "typescript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "mts", "cts"]
    }

    fn skip_patterns(&self) -> &[Regex] {
        &self.skip
    }

    fn tree_sitter_language(&self, path: &Path) -> tree_sitter::Language {
        if path.extension().is_some_and(|ext| ext == "tsx") {
            tree_sitter_typescript::LANGUAGE_TSX.into()
        } else {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        }
    }

    fn parse_cache(&self) -> &ParseCache {
        &self.cache
    }

    fn extract_metadata(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        path: &Path,
    ) -> Result<FileMetadata> {
        Ok(ecma::extract(tree, source, path, self.id()))
    }

    fn reflect_exports(&self, metadata: &FileMetadata) -> ModuleExports {
        ecma::reflect(metadata)
    }

    fn generate_test_content(&self, target: &ResolvedTarget, options: &TestOptions) -> String {
        ecma::jest_scaffold(target, options, true)
    }

    fn unsafe_patterns(&self) -> &'static [&'static str] {
        UNSAFE_PATTERNS
    }
}
