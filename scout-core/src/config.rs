use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level Scout configuration, matching the `scout.toml` layout.
///
/// Every section has defaults, so an empty document is a valid config.
/// Locating and merging config files is left to the embedding tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoutConfig {
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub cache: CacheSection,
}

impl ScoutConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make discovery misbehave rather than fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.max_resolution_attempts == 0 {
            return Err(ConfigError::Invalid(
                "discovery.max_resolution_attempts must be at least 1".into(),
            ));
        }
        for pattern in &self.discovery.unsafe_patterns {
            Regex::new(pattern).map_err(|e| {
                ConfigError::Invalid(format!("discovery.unsafe_patterns `{pattern}`: {e}"))
            })?;
        }
        for rule in self
            .scoring
            .paths
            .positive
            .iter()
            .chain(&self.scoring.paths.negative)
        {
            if rule.pattern.is_empty() {
                return Err(ConfigError::Invalid("empty path rule pattern".into()));
            }
        }
        if let LoaderConfig::Command { program, .. } = &self.discovery.loader {
            if program.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "discovery.loader.program must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// Worker count for the parse pool; `0` in config means one per core.
    pub fn effective_concurrency(&self) -> usize {
        match self.discovery.concurrency {
            0 => std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            n => n,
        }
    }

    /// Persistent cache file for a project rooted at `root`.
    pub fn cache_path(&self, root: &Path) -> PathBuf {
        match &self.cache.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join(".scout").join("cache.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub concurrency: usize,
    /// Directory names never descended into.
    pub skip_dirs: Vec<String>,
    /// Files larger than this are not parsed.
    pub max_file_bytes: u64,
    /// Ranked candidates tried before giving up.
    pub max_resolution_attempts: usize,
    /// Candidates included in a no-match report.
    pub diagnostic_candidates: usize,
    pub plugins: PluginsSection,
    /// Extra denylist regexes applied to every language.
    pub unsafe_patterns: Vec<String>,
    pub loader: LoaderConfig,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            concurrency: 0,
            skip_dirs: [
                "node_modules",
                "target",
                "dist",
                "build",
                "out",
                "coverage",
                "vendor",
                "__pycache__",
                ".venv",
                "venv",
                ".git",
                ".hg",
                ".svn",
                ".scout",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_file_bytes: 1024 * 1024,
            max_resolution_attempts: 25,
            diagnostic_candidates: 10,
            plugins: PluginsSection::default(),
            unsafe_patterns: Vec::new(),
            loader: LoaderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsSection {
    pub disabled: Vec<String>,
}

/// How modules are loaded during resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LoaderConfig {
    /// Reflect exports from static metadata through the owning plugin.
    #[default]
    Plugin,
    /// Run an external introspection command that prints an export descriptor.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_loader_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_loader_timeout_ms() -> u64 {
    10_000
}

// ── Scoring ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Bonus per file extension (without the dot).
    pub extensions: BTreeMap<String, f64>,
    pub file_name: FileNameScores,
    pub paths: PathRules,
    pub type_hints: TypeHintScores,
    pub methods: MentionTrack,
    pub properties: MentionTrack,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let mut extensions = BTreeMap::new();
        for ext in ["js", "ts", "py", "rs", "go"] {
            extensions.insert(ext.to_string(), 10.0);
        }
        for ext in ["jsx", "tsx", "mjs", "cjs", "mts", "cts"] {
            extensions.insert(ext.to_string(), 5.0);
        }
        Self {
            extensions,
            file_name: FileNameScores::default(),
            paths: PathRules::default(),
            type_hints: TypeHintScores::default(),
            methods: MentionTrack {
                per_mention: 3.0,
                max_mentions: 5,
            },
            properties: MentionTrack {
                per_mention: 2.0,
                max_mentions: 5,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileNameScores {
    pub exact: f64,
    pub case_insensitive: f64,
    pub partial: f64,
    /// Awarded when a pattern name matches the file stem.
    pub pattern: f64,
}

impl Default for FileNameScores {
    fn default() -> Self {
        Self {
            exact: 50.0,
            case_insensitive: 30.0,
            partial: 15.0,
            pattern: 20.0,
        }
    }
}

/// A substring of the `/`-separated relative path and its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRule {
    pub pattern: String,
    pub score: f64,
}

impl PathRule {
    fn new(pattern: &str, score: f64) -> Self {
        Self {
            pattern: pattern.to_string(),
            score,
        }
    }
}

/// First matching rule per list applies; a negative match suppresses the
/// positive bonus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathRules {
    pub positive: Vec<PathRule>,
    pub negative: Vec<PathRule>,
}

impl Default for PathRules {
    fn default() -> Self {
        Self {
            positive: vec![
                PathRule::new("/src/", 12.0),
                PathRule::new("/lib/", 8.0),
                PathRule::new("/app/", 6.0),
            ],
            negative: vec![
                PathRule::new("/__tests__/", -40.0),
                PathRule::new("/test/", -30.0),
                PathRule::new("/tests/", -30.0),
                PathRule::new("/fixtures/", -25.0),
                PathRule::new("/__mocks__/", -20.0),
                PathRule::new("/spec/", -20.0),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeHintScores {
    pub class: f64,
    pub function: f64,
    pub object: f64,
    pub module: f64,
}

impl Default for TypeHintScores {
    fn default() -> Self {
        Self {
            class: 15.0,
            function: 10.0,
            object: 8.0,
            module: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MentionTrack {
    pub per_mention: f64,
    pub max_mentions: usize,
}

impl Default for MentionTrack {
    fn default() -> Self {
        Self {
            per_mention: 3.0,
            max_mentions: 5,
        }
    }
}

// ── Cache ──────────────────────────────────────────────────────────

/// One hour.
pub const DEFAULT_CACHE_TTL_MS: u64 = 3_600_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    /// Persistent cache file; relative paths are under the project root.
    pub path: Option<PathBuf>,
    /// Lifetime of a cached resolution.
    pub ttl_ms: u64,
    /// Parsed files kept per plugin.
    pub parse_cache_size: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            ttl_ms: DEFAULT_CACHE_TTL_MS,
            parse_cache_size: scout_lang::languages::DEFAULT_PARSE_CACHE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ScoutConfig::from_toml_str("").unwrap();
        assert_eq!(config, ScoutConfig::default());
        assert_eq!(config.cache.ttl_ms, 3_600_000);
        assert!(config.discovery.skip_dirs.iter().any(|d| d == "node_modules"));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = ScoutConfig::from_toml_str(
            r#"
            [discovery]
            concurrency = 2

            [discovery.plugins]
            disabled = ["go"]

            [scoring.file_name]
            exact = 80.0
            "#,
        )
        .unwrap();
        assert_eq!(config.discovery.concurrency, 2);
        assert_eq!(config.discovery.plugins.disabled, vec!["go"]);
        assert!((config.scoring.file_name.exact - 80.0).abs() < f64::EPSILON);
        assert!((config.scoring.file_name.partial - 15.0).abs() < f64::EPSILON);
        assert_eq!(config.discovery.max_resolution_attempts, 25);
    }

    #[test]
    fn command_loader_parses_with_default_timeout() {
        let config = ScoutConfig::from_toml_str(
            r#"
            [discovery.loader]
            kind = "command"
            program = "node"
            args = ["introspect.js"]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.discovery.loader,
            LoaderConfig::Command {
                program: "node".into(),
                args: vec!["introspect.js".into()],
                timeout_ms: 10_000,
            }
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = ScoutConfig::from_toml_str("[discovery]\nunsafe_patterns = [\"(\"]\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got {err:?}");

        let err = ScoutConfig::from_toml_str("[discovery]\nmax_resolution_attempts = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ScoutConfig::from_toml_str("[discovery\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn cache_path_resolves_against_root() {
        let mut config = ScoutConfig::default();
        let root = Path::new("/repo");
        assert_eq!(config.cache_path(root), PathBuf::from("/repo/.scout/cache.json"));
        config.cache.path = Some("tmp/scout.json".into());
        assert_eq!(config.cache_path(root), PathBuf::from("/repo/tmp/scout.json"));
    }
}
