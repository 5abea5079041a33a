//! Model identifier normalization.
//!
//! Vendor model strings are noisy: `claude-opus-4-6-20260101`,
//! `us.anthropic.claude-opus-4-6-v1:0`, `Claude Opus 4.6`. They all
//! collapse to the canonical tag `opus-4-6`, which is what the store keys on
//! and what pricing is looked up by.

/// Model families recognized by default, in match priority order.
pub const DEFAULT_FAMILIES: &[&str] = &["opus", "sonnet", "haiku"];

/// Longest token still treated as a version component. Date stamps such as
/// `20251101` are longer and end the version.
const MAX_VERSION_TOKEN_LEN: usize = 2;

fn is_separator(c: char) -> bool {
    matches!(c, '-' | '_' | '.' | '/' | ':' | '@') || c.is_whitespace()
}

/// Canonicalizes model identifiers into `family[-major[-minor]]` tags.
#[derive(Debug, Clone)]
pub struct Normalizer {
    families: Vec<String>,
}

impl Normalizer {
    /// Normalizer with the default Claude families.
    pub fn new() -> Self {
        Self::with_families(DEFAULT_FAMILIES.iter().copied())
    }

    /// Normalizer with a custom family list (priority order).
    pub fn with_families<I, S>(families: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            families: families
                .into_iter()
                .map(|f| f.as_ref().to_lowercase())
                .filter(|f| !f.is_empty())
                .collect(),
        }
    }

    /// Families in priority order.
    pub fn families(&self) -> &[String] {
        &self.families
    }

    /// First family keyword contained in `raw`, case-insensitively.
    pub fn family_of(&self, raw: &str) -> Option<&str> {
        let lower = raw.to_lowercase();
        self.families
            .iter()
            .find(|family| lower.contains(family.as_str()))
            .map(String::as_str)
    }

    /// Normalize a raw identifier.
    ///
    /// Absent or blank input yields `None`. Identifiers without a known
    /// family are returned unchanged.
    pub fn normalize(&self, raw: Option<&str>) -> Option<String> {
        let raw = raw?.trim();
        if raw.is_empty() {
            return None;
        }

        let Some(family) = self.family_of(raw) else {
            return Some(raw.to_string());
        };

        let lower = raw.to_lowercase();
        let tokens: Vec<&str> = lower.split(is_separator).filter(|t| !t.is_empty()).collect();

        let Some(family_idx) = tokens.iter().position(|t| t.contains(family)) else {
            return Some(family.to_string());
        };

        let versions: Vec<&str> = tokens[family_idx + 1..]
            .iter()
            .take_while(|t| t.len() <= MAX_VERSION_TOKEN_LEN && t.chars().all(|c| c.is_ascii_digit()))
            .copied()
            .collect();

        if versions.is_empty() {
            Some(family.to_string())
        } else {
            Some(format!("{}-{}", family, versions.join("-")))
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}
