use std::fmt;
use std::path::PathBuf;

use scout_lang::Kind;
use serde::Serialize;

/// Top-level discovery error type.
///
/// Per-file and per-candidate variants are collected as diagnostics while
/// discovery proceeds; only [`DiscoveryError::NoMatch`] and
/// [`DiscoveryError::Cancelled`] end a `discover_target` call.
#[derive(thiserror::Error, Debug)]
pub enum DiscoveryError {
    /// A file could not be statically analyzed.
    #[error("Parse error: {0}")]
    Parse(#[from] scout_lang::LangError),

    /// The static content check rejected a load.
    #[error("Unsafe candidate {path}: matched pattern `{pattern}`")]
    UnsafeCandidate { path: PathBuf, pattern: String },

    /// The module could not be loaded.
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// The loaded value does not satisfy the signature.
    #[error("Validation failed for {path}: {}", problems.join("; "))]
    Validation { path: PathBuf, problems: Vec<String> },

    /// No ranked candidate resolved; carries diagnostics.
    #[error("{0}")]
    NoMatch(Box<NoMatchReport>),

    /// Persistent cache unreadable or unwritable. Never fatal.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Plugin registration rejected.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Discovery cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    /// Stage label used in failure records.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Parse(_) => FailureKind::Parse,
            Self::UnsafeCandidate { .. } => FailureKind::Unsafe,
            Self::Load(_) | Self::Io(_) => FailureKind::Load,
            Self::Validation { .. } => FailureKind::Validation,
            Self::Cancelled => FailureKind::Cancelled,
            Self::NoMatch(_) | Self::Cache(_) | Self::Registry(_) | Self::Config(_) => {
                FailureKind::Other
            }
        }
    }
}

/// Errors raised while obtaining a module's export surface.
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("No plugin handles {0}")]
    NoPlugin(PathBuf),

    /// The owning plugin failed to read or parse the module.
    #[error("Plugin failed: {0}")]
    Plugin(#[source] scout_lang::LangError),

    /// An external introspection command failed.
    #[error("`{program}` failed: {message}")]
    Command { program: String, message: String },

    #[error("Load of {path} timed out after {timeout_ms}ms")]
    Timeout { path: PathBuf, timeout_ms: u64 },

    /// The loader returned output that is not an export descriptor.
    #[error("Malformed export descriptor: {0}")]
    Descriptor(String),

    /// The blocking load task panicked or was cancelled.
    #[error("Load task failed: {0}")]
    Task(String),
}

/// Errors from the persistent cache file.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from plugin registration.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("Invalid plugin `{name}`: {reason}")]
    InvalidPlugin { name: String, reason: String },

    #[error("Extension `.{extension}` already handled by `{existing}`, cannot register `{name}`")]
    ExtensionConflict {
        extension: String,
        existing: String,
        name: String,
    },
}

/// Errors in configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// TOML syntax or shape error.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

// ── Diagnostics ────────────────────────────────────────────────────

/// Stage at which a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Parse,
    Unsafe,
    Load,
    Validation,
    Cancelled,
    Other,
}

/// Why one ranked candidate did not resolve.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFailure {
    pub path: PathBuf,
    pub name: String,
    pub kind: FailureKind,
    pub message: String,
}

/// A ranked candidate as shown in diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSummary {
    pub path: PathBuf,
    pub relative_path: String,
    pub name: String,
    pub kind: Kind,
    pub language: String,
    pub score: f64,
}

/// Payload of [`DiscoveryError::NoMatch`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoMatchReport {
    /// Display form of the normalized signature.
    pub signature: String,
    pub cache_key: String,
    /// Top-ranked candidates, best first.
    pub candidates: Vec<CandidateSummary>,
    pub failures: Vec<CandidateFailure>,
    /// Files that could not be parsed, with the reason.
    pub parse_errors: Vec<(PathBuf, String)>,
}

impl fmt::Display for NoMatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "No candidate matched {} ({} considered, {} failed)",
            self.signature,
            self.candidates.len(),
            self.failures.len()
        )?;
        if let Some(best) = self.candidates.first() {
            write!(
                f,
                "; best was {} in {} (score {:.1})",
                best.name, best.relative_path, best.score
            )?;
        }
        Ok(())
    }
}

/// Convenience alias for `Result<T, DiscoveryError>`.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_match_display_mentions_best_candidate() {
        let report = NoMatchReport {
            signature: "class Calculator".into(),
            cache_key: "abc".into(),
            candidates: vec![CandidateSummary {
                path: "/repo/test/Calculator.js".into(),
                relative_path: "test/Calculator.js".into(),
                name: "Calculator".into(),
                kind: Kind::Class,
                language: "javascript".into(),
                score: 12.5,
            }],
            failures: Vec::new(),
            parse_errors: Vec::new(),
        };
        let text = DiscoveryError::NoMatch(Box::new(report)).to_string();
        assert!(text.contains("class Calculator"));
        assert!(text.contains("test/Calculator.js"));
        assert!(text.contains("12.5"));
    }

    #[test]
    fn failure_kinds_follow_variant() {
        let unsafe_err = DiscoveryError::UnsafeCandidate {
            path: "a.js".into(),
            pattern: "process.exit".into(),
        };
        assert_eq!(unsafe_err.failure_kind(), FailureKind::Unsafe);
        let timeout = DiscoveryError::from(LoadError::Timeout {
            path: "a.go".into(),
            timeout_ms: 10,
        });
        assert_eq!(timeout.failure_kind(), FailureKind::Load);
    }
}
