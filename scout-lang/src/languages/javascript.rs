use std::path::Path;

use regex::Regex;

use crate::value::{ModuleExports, ResolvedTarget};
use crate::{FileMetadata, Result};

use super::{DEFAULT_PARSE_CACHE_SIZE, LanguagePlugin, ParseCache, TestOptions, ecma};

const UNSAFE_PATTERNS: &[&str] = &[
    r"\bprocess\.(exit|kill|abort)\s*\(",
    r#"require\(\s*['"](node:)?child_process['"]\s*\)"#,
    r#"from\s+['"](node:)?child_process['"]"#,
    r"\b(execSync|spawnSync|execFileSync)\s*\(",
    r"\bfs\.(rmSync|rmdirSync|unlinkSync|rm|rmdir|unlink)\s*\(",
    r"\.listen\s*\(\s*(\d+|port\b|PORT\b)",
];

#[derive(Debug)]
pub struct JavaScriptPlugin {
    skip: Vec<Regex>,
    cache: ParseCache,
}

impl JavaScriptPlugin {
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_PARSE_CACHE_SIZE)
    }

    pub fn with_cache_size(cache_size: usize) -> Self {
        let skip = [r"\.min\.js$", r"\.bundle\.js$"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self {
            skip,
            cache: ParseCache::new(cache_size),
        }
    }
}

impl Default for JavaScriptPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguagePlugin for JavaScriptPlugin {
    fn id(&self) -> &'static str {
        "javascript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["js", "jsx", "mjs", "cjs"]
    }

    fn skip_patterns(&self) -> &[Regex] {
        &self.skip
    }

    fn tree_sitter_language(&self, _path: &Path) -> tree_sitter::Language {
        tree_sitter_javascript::LANGUAGE.into()
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
        let esm = target
            .metadata
            .path
            .extension()
            .is_some_and(|ext| ext == "mjs");
        ecma::jest_scaffold(target, options, esm)
    }

    fn unsafe_patterns(&self) -> &'static [&'static str] {
        UNSAFE_PATTERNS
    }
}
