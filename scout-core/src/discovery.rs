//! The discovery orchestrator.
//!
//! [`DiscoveryEngine::discover_target`] normalizes a signature, tries the
//! caches, and otherwise collects and scores candidates across the tree
//! before resolving them in rank order. Collection only parses files; it
//! never loads or runs them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use scout_lang::{LanguagePlugin, ResolvedTarget, Signature, SignatureInput};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::assembler::ResultAssembler;
use crate::candidate::{Candidate, rank};
use crate::config::ScoutConfig;
use crate::error::{CandidateFailure, ConfigError, DiscoveryError, LoadError, NoMatchReport, Result};
use crate::loader::{ModuleLoader, loader_from_config};
use crate::registry::PluginRegistry;
use crate::scoring::{ScoreInput, calculate_score_detailed};

/// Outcome of one collection pass, ranked best first.
#[derive(Debug, Clone, Default)]
pub struct CollectReport {
    pub candidates: Vec<Candidate>,
    /// Files handed to a plugin for parsing.
    pub files_scanned: usize,
    /// Files that failed to parse, with the reason.
    pub parse_errors: Vec<(PathBuf, String)>,
    /// Files over `discovery.max_file_bytes`.
    pub skipped: usize,
}

enum FileOutcome {
    Parsed(Vec<Candidate>),
    Failed(PathBuf, String),
    Cancelled,
}

/// Blocking half of collection: walk, parse and score on the rayon pool.
#[derive(Debug, Clone)]
struct Collector {
    root: PathBuf,
    registry: Arc<PluginRegistry>,
    config: Arc<ScoutConfig>,
    pool: Arc<rayon::ThreadPool>,
}

impl Collector {
    fn collect(&self, signature: &Signature, cancel: &CancellationToken) -> Result<CollectReport> {
        let (files, skipped) = self.walk(signature, cancel)?;

        let outcomes: Vec<FileOutcome> = self.pool.install(|| {
            files
                .par_iter()
                .map(|(path, plugin)| self.scan_file(path, plugin.as_ref(), signature, cancel))
                .collect()
        });

        let mut report = CollectReport {
            files_scanned: files.len(),
            skipped,
            ..CollectReport::default()
        };
        for outcome in outcomes {
            match outcome {
                FileOutcome::Parsed(candidates) => report.candidates.extend(candidates),
                FileOutcome::Failed(path, message) => report.parse_errors.push((path, message)),
                FileOutcome::Cancelled => return Err(DiscoveryError::Cancelled),
            }
        }
        rank(&mut report.candidates);
        report.parse_errors.sort();

        info!(
            files = report.files_scanned,
            candidates = report.candidates.len(),
            parse_errors = report.parse_errors.len(),
            skipped = report.skipped,
            "Collection complete"
        );
        Ok(report)
    }

    fn walk(
        &self,
        signature: &Signature,
        cancel: &CancellationToken,
    ) -> Result<(Vec<(PathBuf, Arc<dyn LanguagePlugin>)>, usize)> {
        let skip_dirs = &self.config.discovery.skip_dirs;
        let max_bytes = self.config.discovery.max_file_bytes;
        let mut files = Vec::new();
        let mut skipped = 0;

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !e
                        .file_name()
                        .to_str()
                        .is_some_and(|name| skip_dirs.iter().any(|d| d == name))
            });

        for entry in walker {
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(plugin) = self.registry.for_file(entry.path()) else {
                continue;
            };
            // A signature that names a language only matches that language.
            if signature.language().is_some_and(|l| l != plugin.id()) {
                continue;
            }
            let size = entry.metadata().map_or(0, |m| m.len());
            if size > max_bytes {
                debug!(path = %entry.path().display(), size, "Skipping oversized file");
                skipped += 1;
                continue;
            }
            files.push((entry.into_path(), plugin));
        }
        Ok((files, skipped))
    }

    fn scan_file(
        &self,
        path: &Path,
        plugin: &dyn LanguagePlugin,
        signature: &Signature,
        cancel: &CancellationToken,
    ) -> FileOutcome {
        if cancel.is_cancelled() {
            return FileOutcome::Cancelled;
        }
        let file = match plugin.parse_file(path) {
            Ok(file) => file,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Parse failed, skipping file");
                return FileOutcome::Failed(path.to_path_buf(), e.to_string());
            }
        };
        let relative_path = relative_path(&self.root, path);
        let candidates = plugin
            .extract_candidates(&file)
            .into_iter()
            .map(|descriptor| {
                let breakdown = calculate_score_detailed(
                    &ScoreInput {
                        relative_path: &relative_path,
                        language: plugin.id(),
                        descriptor: &descriptor,
                        file: &file,
                    },
                    signature,
                    &self.config.scoring,
                    plugin,
                );
                Candidate {
                    path: path.to_path_buf(),
                    relative_path: relative_path.clone(),
                    language: plugin.id(),
                    descriptor,
                    file: Arc::clone(&file),
                    score: breakdown.total,
                    breakdown,
                }
            })
            .collect();
        FileOutcome::Parsed(candidates)
    }
}

/// `/`-separated path of `path` under `root`.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Finds code by structural signature under one project root.
#[derive(Debug)]
pub struct DiscoveryEngine {
    root: PathBuf,
    config: Arc<ScoutConfig>,
    registry: Arc<PluginRegistry>,
    assembler: ResultAssembler,
    collector: Collector,
}

impl DiscoveryEngine {
    /// Engine with the built-in plugins and the configured loader.
    pub fn new(root: impl Into<PathBuf>, config: ScoutConfig) -> Result<Self> {
        let registry = Arc::new(PluginRegistry::with_builtins(&config));
        Self::with_registry(root, config, registry)
    }

    pub fn with_registry(
        root: impl Into<PathBuf>,
        config: ScoutConfig,
        registry: Arc<PluginRegistry>,
    ) -> Result<Self> {
        let loader = loader_from_config(&config.discovery.loader);
        Self::with_loader(root, config, registry, loader)
    }

    pub fn with_loader(
        root: impl Into<PathBuf>,
        config: ScoutConfig,
        registry: Arc<PluginRegistry>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Self> {
        config.validate()?;
        let root = std::fs::canonicalize(root.into())?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_concurrency())
            .thread_name(|i| format!("scout-parse-{i}"))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("parse pool: {e}")))?;
        let config = Arc::new(config);
        let assembler = ResultAssembler::new(&root, &config, loader);
        let collector = Collector {
            root: root.clone(),
            registry: Arc::clone(&registry),
            config: Arc::clone(&config),
            pool: Arc::new(pool),
        };
        debug!(root = %root.display(), plugins = ?registry.plugin_names(), "Discovery engine ready");
        Ok(Self {
            root,
            config,
            registry,
            assembler,
            collector,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ScoutConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn assembler(&self) -> &ResultAssembler {
        &self.assembler
    }

    pub async fn collect_candidates(&self, signature: &Signature) -> Result<CollectReport> {
        self.collect_candidates_with(signature, &CancellationToken::new())
            .await
    }

    /// Walk, parse and score every eligible file. Nothing is loaded.
    #[instrument(skip_all, fields(signature = %signature))]
    pub async fn collect_candidates_with(
        &self,
        signature: &Signature,
        cancel: &CancellationToken,
    ) -> Result<CollectReport> {
        let collector = self.collector.clone();
        let signature = signature.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || collector.collect(&signature, &cancel))
            .await
            .map_err(|e| DiscoveryError::Io(std::io::Error::other(e.to_string())))?
    }

    pub async fn discover_target(
        &self,
        signature: impl Into<SignatureInput>,
    ) -> Result<Arc<ResolvedTarget>> {
        self.discover_target_with(signature, &CancellationToken::new())
            .await
    }

    /// Resolve the best candidate for `signature`.
    ///
    /// Per-candidate failures are recorded and the next candidate is tried;
    /// only [`DiscoveryError::NoMatch`] and [`DiscoveryError::Cancelled`]
    /// are returned.
    #[instrument(skip_all)]
    pub async fn discover_target_with(
        &self,
        signature: impl Into<SignatureInput>,
        cancel: &CancellationToken,
    ) -> Result<Arc<ResolvedTarget>> {
        let signature = Signature::normalize(signature);
        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }
        if let Some(target) = self.assembler.lookup(&signature, &self.registry).await {
            debug!(full_name = %target.full_name, "Served from cache");
            return Ok(Arc::new(target));
        }

        let report = self.collect_candidates_with(&signature, cancel).await?;
        let mut failures = Vec::new();
        for candidate in report
            .candidates
            .iter()
            .take(self.config.discovery.max_resolution_attempts)
        {
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            match self.resolve_candidate(candidate, &signature).await {
                Ok(target) => return Ok(Arc::new(target)),
                Err(e) => {
                    debug!(path = %candidate.relative_path, name = candidate.name(), error = %e, "Candidate rejected");
                    failures.push(CandidateFailure {
                        path: candidate.path.clone(),
                        name: candidate.name().to_string(),
                        kind: e.failure_kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        warn!(signature = %signature, candidates = report.candidates.len(), failures = failures.len(), "No candidate matched");
        Err(DiscoveryError::NoMatch(Box::new(NoMatchReport {
            signature: signature.to_string(),
            cache_key: signature.cache_key(),
            candidates: report
                .candidates
                .iter()
                .take(self.config.discovery.diagnostic_candidates)
                .map(Candidate::summary)
                .collect(),
            failures,
            parse_errors: report.parse_errors,
        })))
    }

    /// Resolve one specific candidate, bypassing ranking.
    pub async fn resolve_candidate(
        &self,
        candidate: &Candidate,
        signature: &Signature,
    ) -> Result<ResolvedTarget> {
        let plugin = self.registry.get(candidate.language).ok_or_else(|| {
            DiscoveryError::Load(LoadError::NoPlugin(candidate.path.clone()))
        })?;
        self.assembler.resolve(candidate, signature, plugin).await
    }

    /// Ranked candidates with score breakdowns, without resolving anything.
    #[instrument(skip_all)]
    pub async fn explain(&self, signature: impl Into<SignatureInput>) -> Result<CollectReport> {
        let signature = Signature::normalize(signature);
        self.collect_candidates(&signature).await
    }

    /// Drop runtime, module, parse and persistent caches.
    pub async fn clear_cache(&self) {
        self.assembler.clear().await;
        self.registry.clear_parse_caches();
        info!("Caches cleared");
    }

    /// Forget cached state for one file, e.g. after an external edit.
    pub async fn invalidate_path(&self, path: &Path) {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if let Some(plugin) = self.registry.for_file(&path) {
            plugin.parse_cache().remove(&path);
        }
        self.assembler.invalidate_path(&path).await;
    }

    /// Wait for pending persistent cache writes.
    pub async fn flush(&self) {
        self.assembler.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use scout_lang::Kind;

    use super::*;
    use crate::error::FailureKind;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn engine(root: &Path) -> DiscoveryEngine {
        let mut config = ScoutConfig::default();
        config.discovery.concurrency = 2;
        DiscoveryEngine::new(root, config).unwrap()
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        assert_eq!(
            relative_path(Path::new("/repo"), Path::new("/repo/src/lib/a.js")),
            "src/lib/a.js"
        );
    }

    #[tokio::test]
    async fn skip_dirs_and_oversized_files_are_not_scanned() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.js", "export class A {}\n");
        write(dir.path(), "node_modules/pkg/a.js", "export class A {}\n");
        write(dir.path(), "src/big.js", &"// pad\n".repeat(10));

        let mut config = ScoutConfig::default();
        config.discovery.max_file_bytes = 40;
        let engine = DiscoveryEngine::new(dir.path(), config).unwrap();
        let sig = Signature::normalize("A");
        let report = engine.collect_candidates(&sig).await.unwrap();
        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.candidates.iter().all(|c| c.relative_path == "src/a.js"));
    }

    #[tokio::test]
    async fn parse_errors_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/Calculator.js", "export class Calculator { add() {} }\n");
        write(dir.path(), "src/broken.js", "export class {{{\n");

        let engine = engine(dir.path());
        let sig = Signature::normalize(SignatureInput::named("Calculator").kind(Kind::Class));
        let report = engine.collect_candidates(&sig).await.unwrap();
        assert_eq!(report.parse_errors.len(), 1);
        assert!(report.parse_errors[0].0.ends_with("broken.js"));
        assert_eq!(report.candidates[0].name(), "Calculator");
    }

    #[tokio::test]
    async fn ranking_puts_source_above_tests() {
        let dir = tempfile::tempdir().unwrap();
        let class = "export class Calculator { add(a, b) { return a + b; } }\n";
        write(dir.path(), "src/Calculator.js", class);
        write(dir.path(), "test/Calculator.js", class);

        let engine = engine(dir.path());
        let sig = Signature::normalize(
            SignatureInput::named("Calculator")
                .kind(Kind::Class)
                .methods(["add"]),
        );
        let report = engine.explain(sig).await.unwrap();
        let top = &report.candidates[0];
        assert_eq!(top.relative_path, "src/Calculator.js");
        assert!(top.breakdown.path > 0.0);
        let test = report
            .candidates
            .iter()
            .find(|c| c.relative_path == "test/Calculator.js" && c.name() == "Calculator")
            .unwrap();
        assert!(test.breakdown.path < 0.0);
    }

    #[tokio::test]
    async fn cancelled_token_stops_discovery() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.js", "export class A {}\n");
        let engine = engine(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine.discover_target_with("A", &cancel).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Cancelled));
    }

    #[tokio::test]
    async fn no_match_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/Calculator.js", "export class Calculator { add() {} }\n");
        let engine = engine(dir.path());
        let err = engine
            .discover_target(SignatureInput::named("Calculator").methods(["divide"]))
            .await
            .unwrap_err();
        let DiscoveryError::NoMatch(report) = err else {
            panic!("expected NoMatch, got {err:?}");
        };
        assert!(!report.candidates.is_empty());
        assert!(report
            .failures
            .iter()
            .any(|f| f.kind == FailureKind::Validation && f.message.contains("divide")));
    }
}
