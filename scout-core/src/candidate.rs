use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;

use scout_lang::{CandidateDescriptor, FileMetadata};

use crate::error::CandidateSummary;
use crate::scoring::ScoreBreakdown;

/// A scored code unit that might be the target. Nothing has been loaded.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    /// `/`-separated path relative to the discovery root.
    pub relative_path: String,
    pub language: &'static str,
    pub descriptor: CandidateDescriptor,
    pub file: Arc<FileMetadata>,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

impl Candidate {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// File stem, e.g. `Calculator` for `src/Calculator.js`.
    pub fn module_name(&self) -> String {
        self.file.module_name()
    }

    pub fn summary(&self) -> CandidateSummary {
        CandidateSummary {
            path: self.path.clone(),
            relative_path: self.relative_path.clone(),
            name: self.descriptor.name.clone(),
            kind: self.descriptor.kind,
            language: self.language.to_string(),
            score: self.score,
        }
    }

    /// Score descending, then path and name ascending.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.relative_path.cmp(&other.relative_path))
            .then_with(|| self.descriptor.name.cmp(&other.descriptor.name))
    }
}

/// Sort into resolution order. Deterministic for equal scores.
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(Candidate::rank_cmp);
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use scout_lang::Kind;

    use super::*;

    fn candidate(path: &str, name: &str, score: f64) -> Candidate {
        Candidate {
            path: PathBuf::from("/repo").join(path),
            relative_path: path.into(),
            language: "javascript",
            descriptor: CandidateDescriptor {
                name: name.into(),
                qualified_name: name.into(),
                kind: Kind::Class,
                export: None,
                export_name: None,
                methods: Vec::new(),
                properties: Vec::new(),
                extends: None,
                module_level: false,
            },
            file: Arc::new(FileMetadata {
                path: PathBuf::from("/repo").join(path),
                language: "javascript",
                entities: Vec::new(),
                imports: Vec::new(),
                identifiers: BTreeSet::new(),
                source: Arc::from(""),
                content_hash: 0,
            }),
            score,
            breakdown: ScoreBreakdown::default(),
        }
    }

    #[test]
    fn ranking_is_score_then_path_then_name() {
        let mut all = vec![
            candidate("b.js", "B", 10.0),
            candidate("a.js", "Z", 10.0),
            candidate("a.js", "A", 10.0),
            candidate("c.js", "C", 30.0),
        ];
        rank(&mut all);
        let order: Vec<(&str, &str)> = all
            .iter()
            .map(|c| (c.relative_path.as_str(), c.name()))
            .collect();
        assert_eq!(order, vec![("c.js", "C"), ("a.js", "A"), ("a.js", "Z"), ("b.js", "B")]);
    }

    #[test]
    fn summary_carries_score_and_kind() {
        let c = candidate("src/Calculator.js", "Calculator", 71.5);
        let s = c.summary();
        assert_eq!(s.relative_path, "src/Calculator.js");
        assert_eq!(s.kind, Kind::Class);
        assert!((s.score - 71.5).abs() < f64::EPSILON);
        assert_eq!(c.module_name(), "Calculator");
    }
}
