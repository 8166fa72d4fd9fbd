//! Prompt classification.
//!
//! The pipeline feeds every prompt through a [`Classifier`] before routing.
//! Two implementations ship behind the trait: [`RulesClassifier`] (default)
//! applies keyword and structural heuristics directly, while
//! [`MlClassifier`] folds the same extracted features into per-type scores
//! and picks the arg-max. Both share the token-estimation and complexity
//! heuristics defined at the bottom of this module.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Prompt category driving routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptType {
    Code,
    Creative,
    Analytical,
    Factual,
    Mathematical,
    Conversational,
    General,
}

impl PromptType {
    /// Stable lowercase name, matching the wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            PromptType::Code => "code",
            PromptType::Creative => "creative",
            PromptType::Analytical => "analytical",
            PromptType::Factual => "factual",
            PromptType::Mathematical => "mathematical",
            PromptType::Conversational => "conversational",
            PromptType::General => "general",
        }
    }
}

/// Estimated effort bucket for a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
    VeryComplex,
}

/// Scheduling priority derived from the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// The classifier's verdict on one prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub prompt_type: PromptType,
    pub complexity: Complexity,
    /// Structural features detected in the prompt (`question`, `code-block`,
    /// `bullet-list`, `equation`, length buckets, …).
    pub features: BTreeSet<String>,
    pub priority: Priority,
    /// Confidence in the chosen type, clamped to the options' bounds.
    pub confidence: f64,
    pub estimated_prompt_tokens: usize,
    pub estimated_completion_tokens: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Classification {
    /// Whether this classification qualifies for the two-model chain.
    pub fn chain_worthy(&self) -> bool {
        self.complexity >= Complexity::Complex
            && (self.prompt_type == PromptType::Analytical || self.features.len() >= 3)
    }
}

/// Per-request classifier tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierOptions {
    /// Lower clamp for the reported confidence.
    pub min_confidence: f64,
    /// Upper clamp for the reported confidence.
    pub max_confidence: f64,
    /// Features forced into the output regardless of detection.
    pub force_features: BTreeSet<String>,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        ClassifierOptions {
            min_confidence: 0.0,
            max_confidence: 1.0,
            force_features: BTreeSet::new(),
        }
    }
}

/// Interface between the pipeline and a classification backend.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, prompt: &str, options: &ClassifierOptions) -> Classification;
}

// -- shared heuristics --

/// Approximate token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

const KEYWORDS: &[(PromptType, &[&str])] = &[
    (
        PromptType::Code,
        &[
            "function", "code", "implement", "compile", "refactor", "class", "algorithm",
            "debug", "api", "script", "regex", "linked list", "unit test",
        ],
    ),
    (
        PromptType::Creative,
        &[
            "story", "poem", "imagine", "fiction", "lyrics", "creative", "haiku", "novel",
            "screenplay",
        ],
    ),
    (
        PromptType::Analytical,
        &[
            "analyze", "analyse", "compare", "evaluate", "assess", "trade-off", "tradeoff",
            "pros and cons", "implications", "why does", "why is",
        ],
    ),
    (
        PromptType::Factual,
        &[
            "what is", "who is", "who was", "when did", "when was", "where is", "define",
            "how many", "capital of",
        ],
    ),
    (
        PromptType::Mathematical,
        &[
            "calculate", "solve", "equation", "integral", "derivative", "probability",
            "theorem", "matrix", "geometry",
        ],
    ),
    (
        PromptType::Conversational,
        &["hello", "hi ", "hey", "how are you", "thanks", "thank you", "good morning"],
    ),
];

fn keyword_hits(lower: &str, prompt_type: PromptType) -> usize {
    KEYWORDS
        .iter()
        .find(|(t, _)| *t == prompt_type)
        .map(|(_, words)| words.iter().filter(|w| lower.contains(*w)).count())
        .unwrap_or(0)
}

fn bucket(value: usize, thresholds: [usize; 3]) -> f64 {
    if value < thresholds[0] {
        0.0
    } else if value < thresholds[1] {
        1.0
    } else if value < thresholds[2] {
        2.0
    } else {
        3.0
    }
}

/// Complexity from a weighted average of length, sentence count, and word
/// count buckets.
pub fn derive_complexity(text: &str) -> Complexity {
    let sentences = text
        .split(|c| c == '.' || c == '?' || c == '!')
        .filter(|s| !s.trim().is_empty())
        .count();
    let words = text.split_whitespace().count();

    let score = 0.5 * bucket(text.len(), [120, 400, 1200])
        + 0.25 * bucket(sentences, [2, 5, 10])
        + 0.25 * bucket(words, [20, 80, 250]);

    if score < 0.5 {
        Complexity::Simple
    } else if score < 1.5 {
        Complexity::Medium
    } else if score < 2.5 {
        Complexity::Complex
    } else {
        Complexity::VeryComplex
    }
}

fn type_multiplier(prompt_type: PromptType) -> f64 {
    match prompt_type {
        PromptType::Code => 1.5,
        PromptType::Creative => 2.5,
        PromptType::Analytical => 2.0,
        PromptType::Factual => 0.8,
        PromptType::Mathematical => 1.2,
        PromptType::Conversational => 0.6,
        PromptType::General => 1.0,
    }
}

fn complexity_multiplier(complexity: Complexity) -> f64 {
    match complexity {
        Complexity::Simple => 0.5,
        Complexity::Medium => 1.0,
        Complexity::Complex => 1.5,
        Complexity::VeryComplex => 2.0,
    }
}

/// Completion estimate: prompt estimate scaled by a type × complexity
/// multiplier, floored so trivial prompts still get a workable budget.
pub fn estimate_completion_tokens(
    prompt_tokens: usize,
    prompt_type: PromptType,
    complexity: Complexity,
) -> usize {
    let scaled =
        prompt_tokens as f64 * type_multiplier(prompt_type) * complexity_multiplier(complexity);
    (scaled as usize).max(16)
}

struct StructuralFeatures {
    question: bool,
    code_fence: bool,
    bullets: bool,
    equation: bool,
}

fn extract_structure(text: &str) -> StructuralFeatures {
    let bullets = text
        .lines()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("- ") || t.starts_with("* ") || t.starts_with("1.")
        })
        .count()
        >= 2;
    StructuralFeatures {
        question: text.contains('?'),
        code_fence: text.contains("```"),
        bullets,
        equation: text.contains('=') && text.chars().any(|c| c.is_ascii_digit()),
    }
}

fn length_feature(len: usize) -> &'static str {
    if len < 120 {
        "short-form"
    } else if len < 1200 {
        "medium-form"
    } else {
        "long-form"
    }
}

fn detect_language(lower: &str) -> Option<String> {
    const LANGUAGES: &[&str] = &[
        "rust", "python", "javascript", "typescript", "java", "c++", "golang", "sql", "ruby",
    ];
    LANGUAGES
        .iter()
        .find(|l| lower.contains(*l))
        .map(|l| l.to_string())
}

fn detect_domain(lower: &str) -> Option<String> {
    const DOMAINS: &[(&str, &str)] = &[
        ("legal", "legal"),
        ("contract", "legal"),
        ("medical", "medical"),
        ("diagnosis", "medical"),
        ("financial", "finance"),
        ("investment", "finance"),
    ];
    DOMAINS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, domain)| domain.to_string())
}

fn priority_for(complexity: Complexity) -> Priority {
    match complexity {
        Complexity::Simple => Priority::Low,
        Complexity::Medium => Priority::Medium,
        Complexity::Complex | Complexity::VeryComplex => Priority::High,
    }
}

fn collect_features(structure: &StructuralFeatures, len: usize) -> BTreeSet<String> {
    let mut features = BTreeSet::new();
    if structure.question {
        features.insert("question".to_string());
    }
    if structure.code_fence {
        features.insert("code-block".to_string());
    }
    if structure.bullets {
        features.insert("bullet-list".to_string());
    }
    if structure.equation {
        features.insert("equation".to_string());
    }
    features.insert(length_feature(len).to_string());
    features
}

fn finish(
    prompt: &str,
    prompt_type: PromptType,
    confidence: f64,
    options: &ClassifierOptions,
) -> Classification {
    let lower = prompt.to_lowercase();
    let structure = extract_structure(prompt);
    let complexity = derive_complexity(prompt);
    let prompt_tokens = estimate_tokens(prompt);

    let mut features = collect_features(&structure, prompt.len());
    for forced in options.force_features.iter() {
        features.insert(forced.clone());
    }

    Classification {
        prompt_type,
        complexity,
        priority: priority_for(complexity),
        confidence: confidence
            .max(options.min_confidence)
            .min(options.max_confidence),
        estimated_prompt_tokens: prompt_tokens,
        estimated_completion_tokens: estimate_completion_tokens(
            prompt_tokens,
            prompt_type,
            complexity,
        ),
        domain: detect_domain(&lower),
        language: detect_language(&lower),
        features,
    }
}

// -- rules-based implementation --

/// Default classifier: keyword and structural heuristics, no model calls.
#[derive(Debug, Default)]
pub struct RulesClassifier;

impl RulesClassifier {
    pub fn new() -> Self {
        RulesClassifier
    }
}

#[async_trait]
impl Classifier for RulesClassifier {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn classify(&self, prompt: &str, options: &ClassifierOptions) -> Classification {
        let lower = prompt.to_lowercase();
        let structure = extract_structure(prompt);

        // Structural signals outrank keywords.
        if structure.code_fence {
            return finish(prompt, PromptType::Code, 0.9, options);
        }

        let mut best = (PromptType::General, 0usize);
        for (prompt_type, _) in KEYWORDS.iter() {
            let hits = keyword_hits(&lower, *prompt_type);
            if hits > best.1 {
                best = (*prompt_type, hits);
            }
        }

        // Equations with no stronger keyword signal read as mathematical.
        if best.1 == 0 && structure.equation {
            return finish(prompt, PromptType::Mathematical, 0.6, options);
        }

        let (prompt_type, hits) = best;
        let confidence = if hits == 0 {
            0.5
        } else {
            (0.55 + 0.1 * hits as f64).min(0.95)
        };
        finish(prompt, prompt_type, confidence, options)
    }
}

// -- score-based implementation --

/// Feature-vector classifier: combines keyword ratios and structural
/// features into per-type scores and picks the arg-max. Deterministic.
#[derive(Debug, Default)]
pub struct MlClassifier;

impl MlClassifier {
    pub fn new() -> Self {
        MlClassifier
    }

    fn score(
        prompt_type: PromptType,
        kw_ratio: f64,
        structure: &StructuralFeatures,
        words: usize,
    ) -> f64 {
        let mut score = 3.0 * kw_ratio;
        match prompt_type {
            PromptType::Code => {
                if structure.code_fence {
                    score += 2.0;
                }
            }
            PromptType::Mathematical => {
                if structure.equation {
                    score += 1.2;
                }
            }
            PromptType::Factual => {
                if structure.question && words < 25 {
                    score += 0.6;
                }
            }
            PromptType::Analytical => {
                if structure.bullets {
                    score += 0.5;
                }
                if words > 80 {
                    score += 0.3;
                }
            }
            PromptType::Conversational => {
                if words < 12 && !structure.question {
                    score += 0.4;
                }
            }
            PromptType::Creative | PromptType::General => {}
        }
        score
    }
}

#[async_trait]
impl Classifier for MlClassifier {
    fn name(&self) -> &'static str {
        "ml"
    }

    async fn classify(&self, prompt: &str, options: &ClassifierOptions) -> Classification {
        let lower = prompt.to_lowercase();
        let structure = extract_structure(prompt);
        let words = prompt.split_whitespace().count().max(1);

        let candidates = [
            PromptType::Code,
            PromptType::Creative,
            PromptType::Analytical,
            PromptType::Factual,
            PromptType::Mathematical,
            PromptType::Conversational,
        ];

        let mut best = (PromptType::General, 0.0f64);
        let mut total = 0.0f64;
        for prompt_type in candidates.iter() {
            let ratio = keyword_hits(&lower, *prompt_type) as f64 / words as f64;
            let score = Self::score(*prompt_type, ratio, &structure, words);
            total += score;
            if score > best.1 {
                best = (*prompt_type, score);
            }
        }

        let (prompt_type, top) = best;
        let confidence = if total > 0.0 {
            (0.4 + 0.6 * top / total).min(0.95)
        } else {
            0.4
        };
        finish(prompt, prompt_type, confidence, options)
    }
}
