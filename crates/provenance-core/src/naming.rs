//! Model filename handling: extension checks and search-name variations.
//!
//! Registry name search is fuzzy on our side: a filename is expanded into an
//! ordered, deduplicated set of query strings by a fixed list of pure rules,
//! and each string is queried on its own.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Extensions recognised as model weights (lowercase, without the dot).
pub const MODEL_EXTENSIONS: &[&str] = &[
    "safetensors",
    "sft",
    "ckpt",
    "pt",
    "pth",
    "bin",
    "gguf",
    "ggml",
    "onnx",
    "pkl",
    "h5",
    "msgpack",
];

/// Variations shorter than this are never queried.
const MIN_VARIATION_CHARS: usize = 2;

/// Leading tokens shorter than this are too generic to query alone.
const MIN_LEADING_TOKEN_CHARS: usize = 3;

/// Trailing version/precision/pruning suffix, e.g. `_fp16`, `-pruned`, `_v5`, `-Q4_K_M`.
static TRAILING_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)[-_. ]+(?:fp16|fp32|bf16|fp8(?:_e4m3fn|_e5m2)?|f16|f32|pruned(?:[-_]?emaonly)?|emaonly|nonema|ema|full|inpainting|inpaint|q\d+_[a-z0-9_]+|v\d+(?:[._]\d+)*[a-z]?|\d{5}-of-\d{5})$",
    )
    .unwrap()
});

/// Lower-to-upper and acronym-to-word boundaries in camelCase names.
static CAMEL_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());
static ACRONYM_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").unwrap());

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_.\s]+").unwrap());

/// Check whether a filename has a model-weight extension.
///
/// Depends only on the lower-cased extension; no filesystem access.
pub fn is_model_file(filename: impl AsRef<Path>) -> bool {
    filename
        .as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MODEL_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Remove a known model extension and any trailing version/precision suffixes.
///
/// ```
/// use provenance_core::naming::clean_model_name;
///
/// assert_eq!(clean_model_name("cyberRealistic_v5.safetensors"), "cyberRealistic");
/// assert_eq!(clean_model_name("sdxl_base_fp16_pruned.ckpt"), "sdxl_base");
/// ```
pub fn clean_model_name(filename: &str) -> String {
    let mut name = match filename.rfind('.') {
        Some(dot) if is_model_file(filename) => &filename[..dot],
        _ => filename,
    }
    .trim()
    .to_string();

    loop {
        let stripped = TRAILING_SUFFIX.replace(&name, "").to_string();
        if stripped == name || stripped.trim().is_empty() {
            break;
        }
        name = stripped;
    }

    name.trim_matches(|c: char| c == '-' || c == '_' || c == '.' || c.is_whitespace())
        .to_string()
}

/// Split camelCase words with spaces: `cyberRealistic` -> `cyber Realistic`.
pub fn split_camel_case(name: &str) -> String {
    let spaced = ACRONYM_BOUNDARY.replace_all(name, "$1 $2");
    CAMEL_BOUNDARY.replace_all(&spaced, "$1 $2").to_string()
}

/// Replace runs of `_`, `-`, `.` and whitespace with a single space.
pub fn separators_to_spaces(name: &str) -> String {
    SEPARATORS.replace_all(name, " ").trim().to_string()
}

/// Drop all separators: `dream_shaper-8` -> `dreamshaper8`.
pub fn strip_separators(name: &str) -> String {
    SEPARATORS.replace_all(name, "").to_string()
}

/// First separator-delimited token, if long enough to be meaningful.
pub fn leading_token(name: &str) -> Option<String> {
    SEPARATORS
        .split(name.trim())
        .find(|t| !t.is_empty())
        .filter(|t| t.chars().count() >= MIN_LEADING_TOKEN_CHARS)
        .map(String::from)
}

/// A rule maps the raw filename to zero or more candidate queries.
type VariationRule = fn(&str) -> Vec<String>;

fn with_lowercase(value: String) -> Vec<String> {
    let lower = value.to_lowercase();
    vec![value, lower]
}

fn rule_verbatim(raw: &str) -> Vec<String> {
    vec![raw.to_string()]
}

fn rule_lowercase(raw: &str) -> Vec<String> {
    vec![raw.to_lowercase()]
}

fn rule_cleaned(raw: &str) -> Vec<String> {
    with_lowercase(clean_model_name(raw))
}

fn rule_camel_split(raw: &str) -> Vec<String> {
    with_lowercase(split_camel_case(&clean_model_name(raw)))
}

fn rule_separators_as_spaces(raw: &str) -> Vec<String> {
    with_lowercase(separators_to_spaces(&clean_model_name(raw)))
}

fn rule_separators_removed(raw: &str) -> Vec<String> {
    with_lowercase(strip_separators(&clean_model_name(raw)))
}

fn rule_leading_token(raw: &str) -> Vec<String> {
    leading_token(&clean_model_name(raw))
        .map(with_lowercase)
        .unwrap_or_default()
}

/// Rules in query order.
const VARIATION_RULES: &[(&str, VariationRule)] = &[
    ("verbatim", rule_verbatim),
    ("lowercase", rule_lowercase),
    ("cleaned", rule_cleaned),
    ("camel_split", rule_camel_split),
    ("separators_as_spaces", rule_separators_as_spaces),
    ("separators_removed", rule_separators_removed),
    ("leading_token", rule_leading_token),
];

/// Ordered, deduplicated search strings derived from one filename.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchVariations(Vec<String>);

impl SearchVariations {
    pub fn from_filename(raw: &str) -> Self {
        let mut seen = std::collections::HashSet::new();
        let variations = VARIATION_RULES
            .iter()
            .flat_map(|(_, rule)| rule(raw))
            .map(|v| v.trim().to_string())
            .filter(|v| v.chars().count() >= MIN_VARIATION_CHARS)
            .filter(|v| seen.insert(v.clone()))
            .collect();
        Self(variations)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|v| v == value)
    }
}

impl IntoIterator for SearchVariations {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a SearchVariations {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
