//! Signatures: structural descriptions of the code a caller is looking for.
//!
//! Callers hand in a partial [`SignatureInput`] (or just a name); the
//! normalizer turns it into an immutable [`Signature`] with trimmed,
//! de-duplicated fields and a compiled name matcher. The normalized form is
//! also the material for the resolution cache key.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::content_hash;

/// The kind of runtime value a signature asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Class,
    Function,
    Object,
    Module,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
            Self::Object => "object",
            Self::Module => "module",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Name matching ──────────────────────────────────────────────────

/// A compiled signature name: either an exact identifier or a pattern.
#[derive(Debug, Clone)]
pub enum NamePattern {
    Exact(String),
    Pattern {
        source: String,
        flags: String,
        regex: Regex,
    },
}

impl NamePattern {
    /// Parse a raw name. `/source/flags` strings compile to patterns; anything
    /// else (including a pattern that fails to compile) is an exact name.
    pub fn parse(raw: &str) -> Self {
        match split_pattern_literal(raw) {
            Some((source, flags)) => {
                Self::compile(source, flags).unwrap_or_else(|| Self::Exact(raw.to_string()))
            }
            None => Self::Exact(raw.to_string()),
        }
    }

    /// Build a pattern from its parts, degrading to an exact match on the
    /// source text when the regex is invalid.
    pub fn pattern(source: &str, flags: &str) -> Self {
        Self::compile(source, flags).unwrap_or_else(|| Self::Exact(source.to_string()))
    }

    fn compile(source: &str, flags: &str) -> Option<Self> {
        let mut inline = String::new();
        for flag in flags.chars() {
            if matches!(flag, 'i' | 'm' | 's' | 'x') && !inline.contains(flag) {
                inline.push(flag);
            }
        }
        let expr = if inline.is_empty() {
            source.to_string()
        } else {
            format!("(?{inline}){source}")
        };
        match Regex::new(&expr) {
            Ok(regex) => Some(Self::Pattern {
                source: source.to_string(),
                flags: flags.to_string(),
                regex,
            }),
            Err(e) => {
                warn!(pattern = %source, error = %e, "Invalid name pattern, falling back to exact match");
                None
            }
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Pattern { .. })
    }

    /// Case-sensitive match for exact names, regex search for patterns.
    pub fn is_match(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(name) => name == candidate,
            Self::Pattern { regex, .. } => regex.is_match(candidate),
        }
    }

    /// Case-insensitive match; patterns keep their own flags.
    pub fn matches_ignore_case(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(name) => name.eq_ignore_ascii_case(candidate),
            Self::Pattern { regex, .. } => regex.is_match(candidate),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Exact(name) => serde_json::Value::String(name.clone()),
            Self::Pattern { source, flags, .. } => serde_json::json!({
                "source": source,
                "flags": flags,
            }),
        }
    }
}

impl PartialEq for NamePattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (
                Self::Pattern { source: a, flags: fa, .. },
                Self::Pattern { source: b, flags: fb, .. },
            ) => a == b && fa == fb,
            _ => false,
        }
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => f.write_str(name),
            Self::Pattern { source, flags, .. } => write!(f, "/{source}/{flags}"),
        }
    }
}

fn split_pattern_literal(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    let (source, flags) = (&rest[..end], &rest[end + 1..]);
    if source.is_empty() || !flags.chars().all(|c| "gimsuyx".contains(c)) {
        return None;
    }
    Some((source, flags))
}

// ── Partial input ──────────────────────────────────────────────────

/// A signature name as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameInput {
    Text(String),
    Pattern {
        source: String,
        #[serde(default)]
        flags: String,
    },
}

impl From<&str> for NameInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for NameInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A partial, caller-supplied signature. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInput {
    #[serde(default)]
    pub name: Option<NameInput>,
    #[serde(default, rename = "type")]
    pub kind: Option<Kind>,
    #[serde(default)]
    pub exports: Option<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub instance_of: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Fields this version does not understand; preserved, never scored.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SignatureInput {
    pub fn named(name: impl Into<NameInput>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = properties.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn exports(mut self, name: impl Into<String>) -> Self {
        self.exports = Some(name.into());
        self
    }

    #[must_use]
    pub fn extends(mut self, name: impl Into<String>) -> Self {
        self.extends = Some(name.into());
        self
    }

    #[must_use]
    pub fn instance_of(mut self, name: impl Into<String>) -> Self {
        self.instance_of = Some(name.into());
        self
    }

    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

impl From<&str> for SignatureInput {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for SignatureInput {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

impl From<&Signature> for SignatureInput {
    fn from(sig: &Signature) -> Self {
        Self {
            name: sig.name.as_ref().map(|n| match n {
                NamePattern::Exact(name) => NameInput::Text(name.clone()),
                NamePattern::Pattern { source, flags, .. } => NameInput::Pattern {
                    source: source.clone(),
                    flags: flags.clone(),
                },
            }),
            kind: sig.kind,
            exports: sig.exports.clone(),
            methods: sig.methods.clone(),
            properties: sig.properties.clone(),
            extends: sig.extends.clone(),
            instance_of: sig.instance_of.clone(),
            language: sig.language.clone(),
            extra: sig.extra.clone(),
        }
    }
}

impl From<Signature> for SignatureInput {
    fn from(sig: Signature) -> Self {
        Self::from(&sig)
    }
}

// ── Normalized signature ───────────────────────────────────────────

/// A normalized, immutable signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    name: Option<NamePattern>,
    kind: Option<Kind>,
    exports: Option<String>,
    methods: Vec<String>,
    properties: Vec<String>,
    extends: Option<String>,
    instance_of: Option<String>,
    language: Option<String>,
    extra: BTreeMap<String, serde_json::Value>,
}

impl Signature {
    /// Normalize a partial signature. Never fails.
    pub fn normalize(input: impl Into<SignatureInput>) -> Self {
        let input = input.into();
        let name = input.name.and_then(|n| match n {
            NameInput::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| NamePattern::parse(trimmed))
            }
            NameInput::Pattern { source, flags } => {
                (!source.is_empty()).then(|| NamePattern::pattern(&source, &flags))
            }
        });

        Self {
            name,
            kind: input.kind,
            exports: clean(input.exports),
            methods: dedupe(input.methods),
            properties: dedupe(input.properties),
            extends: clean(input.extends),
            instance_of: clean(input.instance_of),
            language: clean(input.language).map(|l| l.to_ascii_lowercase()),
            extra: input.extra,
        }
    }

    pub fn name(&self) -> Option<&NamePattern> {
        self.name.as_ref()
    }

    pub fn kind(&self) -> Option<Kind> {
        self.kind
    }

    pub fn exports(&self) -> Option<&str> {
        self.exports.as_deref()
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    pub fn extends(&self) -> Option<&str> {
        self.extends.as_deref()
    }

    pub fn instance_of(&self) -> Option<&str> {
        self.instance_of.as_deref()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn extra(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.extra
    }

    /// `true` when the signature's name (if any) matches `candidate`.
    pub fn name_matches(&self, candidate: &str) -> bool {
        self.name.as_ref().is_none_or(|n| n.is_match(candidate))
    }

    /// `true` when the signature's kind (if any) equals `kind`.
    pub fn kind_matches(&self, kind: Kind) -> bool {
        self.kind.is_none_or(|k| k == kind)
    }

    /// Deterministic JSON form with sorted keys.
    pub fn canonical_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name.as_ref().map(NamePattern::to_json),
            "type": self.kind.map(Kind::as_str),
            "exports": self.exports,
            "methods": self.methods,
            "properties": self.properties,
            "extends": self.extends,
            "instanceOf": self.instance_of,
            "language": self.language,
            "extra": self.extra,
        })
    }

    /// Stable cache key: a hash of the canonical JSON form.
    pub fn cache_key(&self) -> String {
        let canonical = self.canonical_json().to_string();
        format!("{:016x}", content_hash(canonical.as_bytes()))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kind) = self.kind {
            write!(f, "{kind} ")?;
        }
        match &self.name {
            Some(name) => write!(f, "{name}")?,
            None => f.write_str("<any>")?,
        }
        if let Some(base) = &self.extends {
            write!(f, " extends {base}")?;
        }
        if !self.methods.is_empty() || !self.properties.is_empty() {
            let members: Vec<&str> = self
                .methods
                .iter()
                .map(String::as_str)
                .chain(self.properties.iter().map(String::as_str))
                .collect();
            write!(f, " {{ {} }}", members.join(", "))?;
        }
        Ok(())
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn dedupe(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect()
}
