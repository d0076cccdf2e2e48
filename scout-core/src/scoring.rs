//! Static candidate scoring.
//!
//! Every term is a pure function of its inputs so terms can be tested in
//! isolation and rankings are reproducible. The total is always the sum of
//! the terms reported in [`ScoreBreakdown`].

use std::path::Path;

use scout_lang::{CandidateDescriptor, FileMetadata, Kind, LanguagePlugin, NamePattern, Signature};
use serde::Serialize;

use crate::config::{FileNameScores, MentionTrack, PathRule, PathRules, ScoringConfig, TypeHintScores};

/// Explainable decomposition of a candidate's score.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub path: f64,
    pub extension: f64,
    pub file_name: f64,
    pub type_hints: f64,
    pub methods: f64,
    pub properties: f64,
    pub language_specific: f64,
    pub total: f64,
    pub details: Vec<String>,
}

/// Borrowed view of everything scoring looks at for one candidate.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    /// `/`-separated path relative to the discovery root.
    pub relative_path: &'a str,
    pub language: &'a str,
    pub descriptor: &'a CandidateDescriptor,
    pub file: &'a FileMetadata,
}

impl ScoreInput<'_> {
    fn extension(&self) -> &str {
        Path::new(self.relative_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
    }

    fn stem(&self) -> &str {
        Path::new(self.relative_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    }
}

pub fn calculate_score(
    input: &ScoreInput<'_>,
    signature: &Signature,
    config: &ScoringConfig,
    plugin: &dyn LanguagePlugin,
) -> f64 {
    calculate_score_detailed(input, signature, config, plugin).total
}

pub fn calculate_score_detailed(
    input: &ScoreInput<'_>,
    signature: &Signature,
    config: &ScoringConfig,
    plugin: &dyn LanguagePlugin,
) -> ScoreBreakdown {
    let mut details = Vec::new();

    let extension = score_extension(input.extension(), input.language, signature, config);
    if extension != 0.0 {
        details.push(format!("extension .{}: {extension:+}", input.extension()));
    }

    let file_name = score_file_name(input.stem(), signature, &config.file_name);
    if file_name != 0.0 {
        details.push(format!("file name `{}`: {file_name:+}", input.stem()));
    }

    let (path, rule) = score_path(input.relative_path, &config.paths);
    if let Some(rule) = rule {
        details.push(format!("path rule `{rule}`: {path:+}"));
    }

    let type_hints = score_type_hints(input.descriptor, &input.file.source, signature, &config.type_hints);
    if type_hints != 0.0 {
        details.push(format!("type hint: {type_hints:+}"));
    }

    let methods = score_method_mentions(input.descriptor, input.file, signature, &config.methods);
    if methods != 0.0 {
        details.push(format!("method mentions: {methods:+}"));
    }

    let properties =
        score_property_mentions(input.descriptor, input.file, signature, &config.properties);
    if properties != 0.0 {
        details.push(format!("property mentions: {properties:+}"));
    }

    let language_specific = plugin.score_language_specific(input.descriptor, signature);
    if language_specific != 0.0 {
        details.push(format!("{} adjustments: {language_specific:+}", plugin.id()));
    }

    ScoreBreakdown {
        path,
        extension,
        file_name,
        type_hints,
        methods,
        properties,
        language_specific,
        total: path + extension + file_name + type_hints + methods + properties + language_specific,
        details,
    }
}

/// Extension bonus; zero when the signature asks for another language.
pub fn score_extension(
    extension: &str,
    language: &str,
    signature: &Signature,
    config: &ScoringConfig,
) -> f64 {
    if signature.language().is_some_and(|wanted| wanted != language) {
        return 0.0;
    }
    config
        .extensions
        .get(&extension.to_ascii_lowercase())
        .copied()
        .unwrap_or(0.0)
}

/// Lowercase with separators removed: `calculator-service` and
/// `CalculatorService` compare equal.
fn fold(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '-' | '_' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Exact > case-insensitive > partial > none.
pub fn score_file_name(stem: &str, signature: &Signature, scores: &FileNameScores) -> f64 {
    let Some(name) = signature.name() else {
        return 0.0;
    };
    let wanted = match name {
        NamePattern::Exact(wanted) => wanted,
        pattern => return if pattern.is_match(stem) { scores.pattern } else { 0.0 },
    };
    if stem == wanted {
        return scores.exact;
    }
    let (stem, wanted) = (fold(stem), fold(wanted));
    if stem.is_empty() || wanted.is_empty() {
        return 0.0;
    }
    if stem == wanted {
        scores.case_insensitive
    } else if stem.contains(&wanted) || wanted.contains(&stem) {
        scores.partial
    } else {
        0.0
    }
}

/// First positive and first negative rule; a negative match suppresses the
/// positive bonus. Returns the score and the deciding rule.
pub fn score_path<'a>(relative_path: &str, rules: &'a PathRules) -> (f64, Option<&'a str>) {
    let normalized = format!("/{}", relative_path.replace('\\', "/").trim_start_matches('/'));
    let matches = |rule: &&PathRule| normalized.contains(&rule.pattern);

    if let Some(rule) = rules.negative.iter().find(matches) {
        // A misconfigured non-negative penalty still counts against the path.
        return (-rule.score.abs(), Some(rule.pattern.as_str()));
    }
    match rules.positive.iter().find(matches) {
        Some(rule) => (rule.score, Some(rule.pattern.as_str())),
        None => (0.0, None),
    }
}

/// Reward when the candidate's kind, or a textual marker in the file,
/// agrees with the signature's kind.
pub fn score_type_hints(
    descriptor: &CandidateDescriptor,
    source: &str,
    signature: &Signature,
    scores: &TypeHintScores,
) -> f64 {
    let Some(kind) = signature.kind() else {
        return 0.0;
    };
    let reward = match kind {
        Kind::Class => scores.class,
        Kind::Function => scores.function,
        Kind::Object => scores.object,
        Kind::Module => scores.module,
    };
    if descriptor.kind == kind || has_kind_marker(kind, source) {
        reward
    } else {
        0.0
    }
}

fn has_kind_marker(kind: Kind, source: &str) -> bool {
    let markers: &[&str] = match kind {
        Kind::Class => &["class ", "struct "],
        Kind::Function => &["function ", "def ", "fn ", "func ", "=>"],
        Kind::Object => &["new ", "= {", "struct{", "Object.freeze("],
        Kind::Module => &["export ", "module.exports", "__all__", "pub mod ", "package "],
    };
    markers.iter().any(|m| source.contains(m))
}

/// `min(matched, max_mentions) * per_mention` over signature methods that
/// the candidate declares or the file mentions.
pub fn score_method_mentions(
    descriptor: &CandidateDescriptor,
    file: &FileMetadata,
    signature: &Signature,
    track: &MentionTrack,
) -> f64 {
    mention_score(signature.methods(), &descriptor.methods, file, track)
}

/// Same shape as [`score_method_mentions`], for signature properties.
pub fn score_property_mentions(
    descriptor: &CandidateDescriptor,
    file: &FileMetadata,
    signature: &Signature,
    track: &MentionTrack,
) -> f64 {
    mention_score(signature.properties(), &descriptor.properties, file, track)
}

fn mention_score(
    wanted: &[String],
    declared: &[String],
    file: &FileMetadata,
    track: &MentionTrack,
) -> f64 {
    let matched = wanted
        .iter()
        .filter(|name| declared.contains(name) || file.identifiers.contains(name.as_str()))
        .count()
        .min(track.max_mentions);
    #[allow(clippy::cast_precision_loss)]
    let matched = matched as f64;
    matched * track.per_mention
}
