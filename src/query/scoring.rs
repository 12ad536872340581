use crate::lang::is_config_language;
use crate::query::preprocess::QueryContext;
use crate::symbols::extract::TypeInfo;
use regex::Regex;
use std::cmp::Ordering;

/// Stored fields of one candidate document, as the factors see them.
#[derive(Debug, Clone, Default)]
pub struct DocFields {
    pub path: String,
    pub relative_path: String,
    pub filename: String,
    pub extension: String,
    pub language: String,
    pub content: String,
    pub size: u64,
    pub last_modified: u64,
    pub content_hash: String,
    pub type_info: Option<TypeInfo>,
}

/// An independently weighted contribution in `[0, 1]`.
pub trait ScoringFactor: Send + Sync {
    fn name(&self) -> &'static str;
    fn weight(&self) -> f32;
    fn score(&self, doc: &DocFields, ctx: &QueryContext) -> f32;
}

/// Wraps the base text score with the weighted factor blend:
/// `0.6 * base + 0.4 * (factor_score * base)`.
pub struct CompositeScorer {
    factors: Vec<Box<dyn ScoringFactor>>,
}

impl CompositeScorer {
    pub fn standard() -> Self {
        Self {
            factors: vec![
                Box::new(PathRelevance),
                Box::new(FilenameRelevance),
                Box::new(FileTypeRelevance),
                Box::new(RecencyBoost),
                Box::new(ExactMatchBoost),
                Box::new(InterfaceImplementation),
                Box::new(TypeDefinitionBoost),
            ],
        }
    }

    pub fn rescore(&self, base_score: f32, doc: &DocFields, ctx: &QueryContext) -> f32 {
        let mut weight_sum = 0.0f32;
        let mut weighted = 0.0f32;
        for factor in &self.factors {
            let w = factor.weight();
            weight_sum += w;
            weighted += w * factor.score(doc, ctx).clamp(0.0, 1.0);
        }
        if weight_sum == 0.0 {
            return base_score;
        }
        let factor_score = weighted / weight_sum;
        0.6 * base_score + 0.4 * (factor_score * base_score)
    }
}

const SCORE_EPSILON: f32 = 1e-6;

/// Deterministic ordering: score descending; within epsilon, shorter
/// relative path, then earlier modification time, then lexicographic path.
pub fn compare_scored(a_score: f32, a: &DocFields, b_score: f32, b: &DocFields) -> Ordering {
    if (a_score - b_score).abs() > SCORE_EPSILON {
        return b_score
            .partial_cmp(&a_score)
            .unwrap_or(Ordering::Equal);
    }
    a.relative_path
        .len()
        .cmp(&b.relative_path.len())
        .then_with(|| a.last_modified.cmp(&b.last_modified))
        .then_with(|| a.path.cmp(&b.path))
}

// ---------------------------------------------------------------------------
// Factors
// ---------------------------------------------------------------------------

struct PathRelevance;

const NOISE_SEGMENTS: &[&str] = &["test", "tests", "spec", "specs", "bin", "obj", "node_modules", ".git"];
const CODE_SEGMENTS: &[&str] = &["src", "lib", "core", "source", "app"];

impl ScoringFactor for PathRelevance {
    fn name(&self) -> &'static str {
        "path_relevance"
    }

    fn weight(&self) -> f32 {
        1.0
    }

    fn score(&self, doc: &DocFields, _ctx: &QueryContext) -> f32 {
        let segments: Vec<String> = doc
            .relative_path
            .split('/')
            .map(|s| s.to_lowercase())
            .collect();
        if segments.iter().any(|s| NOISE_SEGMENTS.contains(&s.as_str())) {
            return 0.2;
        }
        if segments.iter().any(|s| CODE_SEGMENTS.contains(&s.as_str())) {
            return 0.8;
        }
        0.5
    }
}

struct FilenameRelevance;

impl ScoringFactor for FilenameRelevance {
    fn name(&self) -> &'static str {
        "filename_relevance"
    }

    fn weight(&self) -> f32 {
        1.5
    }

    fn score(&self, doc: &DocFields, ctx: &QueryContext) -> f32 {
        let stem = doc
            .filename
            .rsplit_once('.')
            .map(|(s, _)| s)
            .unwrap_or(&doc.filename)
            .to_lowercase();
        let normalized_query: String = ctx
            .cleaned
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if !normalized_query.is_empty() && stem.replace(['_', '-'], "") == normalized_query {
            return 1.0;
        }
        if ctx.terms.is_empty() {
            return 0.0;
        }
        let filename_lower = doc.filename.to_lowercase();
        let present = ctx
            .terms
            .iter()
            .filter(|t| filename_lower.contains(t.as_str()))
            .count();
        if present == ctx.terms.len() {
            0.3
        } else {
            0.3 * present as f32 / ctx.terms.len() as f32
        }
    }
}

struct FileTypeRelevance;

impl ScoringFactor for FileTypeRelevance {
    fn name(&self) -> &'static str {
        "file_type"
    }

    fn weight(&self) -> f32 {
        0.5
    }

    fn score(&self, doc: &DocFields, ctx: &QueryContext) -> f32 {
        if ctx.is_config_query && is_config_language(&doc.language) {
            return 0.9;
        }
        match doc.extension.as_str() {
            "rs" | "cs" | "ts" | "tsx" | "py" | "go" | "java" | "cpp" | "c" | "kt" | "swift" => 0.8,
            "js" | "jsx" | "rb" | "php" | "scala" => 0.7,
            "json" | "yaml" | "yml" | "toml" | "xml" => 0.5,
            "md" | "mdx" | "txt" | "rst" => 0.4,
            _ => 0.6,
        }
    }
}

struct RecencyBoost;

impl ScoringFactor for RecencyBoost {
    fn name(&self) -> &'static str {
        "recency"
    }

    fn weight(&self) -> f32 {
        0.5
    }

    fn score(&self, doc: &DocFields, _ctx: &QueryContext) -> f32 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let age_days = now.saturating_sub(doc.last_modified) as f32 / 86_400.0;
        // Log-scaled decay: today ~1.0, a month ~0.22, a year ~0.14.
        1.0 / (1.0 + (1.0 + age_days).ln())
    }
}

struct ExactMatchBoost;

impl ScoringFactor for ExactMatchBoost {
    fn name(&self) -> &'static str {
        "exact_match"
    }

    fn weight(&self) -> f32 {
        1.5
    }

    fn score(&self, doc: &DocFields, ctx: &QueryContext) -> f32 {
        let Some(re) = word_boundary_regex(&ctx.cleaned, ctx.case_sensitive) else {
            return 0.0;
        };
        let count = re.find_iter(&doc.content).take(20).count();
        if count == 0 {
            return 0.0;
        }
        let mut score = (0.1 * count as f32).min(0.7);
        if re.is_match(&doc.filename) {
            score += 0.3;
        }
        score.min(1.0)
    }
}

/// Word-boundary regex for the cleaned query text, used by both the exact
/// match factor and case-sensitive post-filtering.
pub fn word_boundary_regex(cleaned: &str, case_sensitive: bool) -> Option<Regex> {
    let escaped = regex::escape(cleaned.trim());
    if escaped.is_empty() {
        return None;
    }
    let pattern = if case_sensitive {
        format!(r"\b{escaped}\b")
    } else {
        format!(r"(?i)\b{escaped}\b")
    };
    Regex::new(&pattern).ok()
}

struct InterfaceImplementation;

const MOCK_MARKERS: &[&str] = &["mock", "fake", "stub", "test", "spec"];

impl ScoringFactor for InterfaceImplementation {
    fn name(&self) -> &'static str {
        "interface_implementation"
    }

    fn weight(&self) -> f32 {
        0.5
    }

    fn score(&self, doc: &DocFields, ctx: &QueryContext) -> f32 {
        if !ctx.looks_like_interface {
            return 0.5;
        }
        let path_lower = doc.relative_path.to_lowercase();
        if MOCK_MARKERS.iter().any(|m| path_lower.contains(m)) {
            0.1
        } else {
            0.7
        }
    }
}

struct TypeDefinitionBoost;

impl ScoringFactor for TypeDefinitionBoost {
    fn name(&self) -> &'static str {
        "type_definition"
    }

    fn weight(&self) -> f32 {
        1.0
    }

    fn score(&self, doc: &DocFields, ctx: &QueryContext) -> f32 {
        if !ctx.looks_like_type {
            return 0.5;
        }
        let Some(info) = &doc.type_info else {
            return 0.3;
        };
        let wanted = ctx.cleaned.to_lowercase();
        if info
            .types
            .iter()
            .any(|t| t.name.to_lowercase() == wanted)
        {
            1.0
        } else {
            0.3
        }
    }
}
