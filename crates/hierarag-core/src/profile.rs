//! User profiles and the personalization score used by the ranker.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::RagError;
use crate::memory::{ConversationMemory, MemoryConfig};
use crate::models::clamp_unit;

/// Smoothing factor of the expertise moving average.
pub const EXPERTISE_RATE: f64 = 0.2;

const DOMAIN_WEIGHT: f64 = 0.6;
const MEMORY_WEIGHT: f64 = 0.4;

/// How much detail a user wants in answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Brief,
    #[default]
    Standard,
    Detailed,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Brief => "brief",
            DetailLevel::Standard => "standard",
            DetailLevel::Detailed => "detailed",
        }
    }

    /// Number of evidence sentences in a synthesized answer.
    pub fn sentence_budget(&self) -> usize {
        match self {
            DetailLevel::Brief => 2,
            DetailLevel::Standard => 3,
            DetailLevel::Detailed => 5,
        }
    }
}

impl FromStr for DetailLevel {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "brief" => Ok(DetailLevel::Brief),
            "standard" => Ok(DetailLevel::Standard),
            "detailed" => Ok(DetailLevel::Detailed),
            other => Err(RagError::InvalidInput(format!(
                "unknown detail level: {}. Use brief, standard, or detailed.",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub detail_level: DetailLevel,
    pub prefers_examples: bool,
    pub preferred_domains: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    /// Domain → level in `[0, 1]`.
    #[serde(default, deserialize_with = "clamped_expertise")]
    pub expertise: BTreeMap<String, f64>,
    #[serde(default)]
    pub preferences: Preferences,
    /// How strongly results are personalized, in `[0, 1]`.
    #[serde(default, deserialize_with = "clamped_level")]
    pub personalization_level: f64,
    #[serde(default)]
    pub updated_at: i64,
}

// Stored profiles may be edited by hand; keep loaded values in range.
fn clamped_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    f64::deserialize(deserializer).map(clamp_unit)
}

fn clamped_expertise<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, f64>, D::Error> {
    let raw = BTreeMap::<String, f64>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, clamp_unit(v))).collect())
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Set the personalization level, clamping to `[0, 1]` (NaN → 0).
    pub fn set_personalization_level(&mut self, level: f64) {
        self.personalization_level = clamp_unit(level);
    }

    /// Move the expertise for `domain` toward `signal` with an exponential
    /// moving average: `level += 0.2·(signal − level)`.
    pub fn update_expertise(&mut self, domain: &str, signal: f64) {
        let key = domain.trim().to_lowercase();
        if key.is_empty() {
            return;
        }
        let level = self.expertise.entry(key).or_insert(0.0);
        *level = clamp_unit(*level + EXPERTISE_RATE * (clamp_unit(signal) - *level));
    }

    pub fn expertise_in(&self, domain: &str) -> f64 {
        self.expertise
            .get(&domain.trim().to_lowercase())
            .copied()
            .unwrap_or(0.0)
    }

    fn prefers(&self, domain: &str) -> bool {
        self.preferences
            .preferred_domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain.trim()))
    }

    /// Max over `tags` of 1.0 for a preferred domain, else the expertise level.
    pub fn domain_affinity(&self, tags: &[String]) -> f64 {
        tags.iter()
            .map(|t| {
                if self.prefers(t) {
                    1.0
                } else {
                    self.expertise_in(t)
                }
            })
            .fold(0.0, f64::max)
    }
}

/// Everything the ranker needs to personalize one request.
#[derive(Debug, Clone, Copy)]
pub struct PersonalContext<'a> {
    pub profile: &'a UserProfile,
    pub memory: Option<&'a ConversationMemory>,
    pub memory_config: &'a MemoryConfig,
    pub now: i64,
}

impl PersonalContext<'_> {
    /// `0.6·domain_affinity + 0.4·memory_affinity`, in `[0, 1]`.
    pub fn personal_score(&self, tags: &[String], text: &str) -> f64 {
        let domain = self.profile.domain_affinity(tags);
        let memory = self
            .memory
            .map(|m| m.affinity(text, self.memory_config, self.now))
            .unwrap_or(0.0);
        clamp_unit(DOMAIN_WEIGHT * domain + MEMORY_WEIGHT * memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemoryItem, MemorySource};

    #[test]
    fn test_personalization_level_clamped() {
        let mut p = UserProfile::new("u1");
        p.set_personalization_level(1.5);
        assert_eq!(p.personalization_level, 1.0);
        p.set_personalization_level(f64::NAN);
        assert_eq!(p.personalization_level, 0.0);
    }

    #[test]
    fn test_deserialize_clamps_levels() {
        let p: UserProfile = serde_json::from_str(
            r#"{"user_id":"u1","personalization_level":7.5,"expertise":{"ml":-2.0,"db":0.4}}"#,
        )
        .unwrap();
        assert_eq!(p.personalization_level, 1.0);
        assert_eq!(p.expertise_in("ml"), 0.0);
        assert!((p.expertise_in("db") - 0.4).abs() < 1e-9);

        let p: UserProfile = serde_json::from_str(r#"{"user_id":"u2"}"#).unwrap();
        assert_eq!(p.personalization_level, 0.0);
        assert!(p.expertise.is_empty());
    }

    #[test]
    fn test_expertise_ema() {
        let mut p = UserProfile::new("u1");
        p.update_expertise("Databases", 1.0);
        assert!((p.expertise_in("databases") - 0.2).abs() < 1e-9);
        p.update_expertise("databases", 1.0);
        assert!((p.expertise_in("databases") - 0.36).abs() < 1e-9);
        p.update_expertise("databases", 0.0);
        assert!((p.expertise_in("databases") - 0.288).abs() < 1e-9);
        p.update_expertise("  ", 1.0);
        assert_eq!(p.expertise.len(), 1);
    }

    #[test]
    fn test_domain_affinity_prefers_preferred() {
        let mut p = UserProfile::new("u1");
        p.expertise.insert("ml".into(), 0.4);
        p.preferences.preferred_domains = vec!["Biology".into()];
        assert!((p.domain_affinity(&["ml".into()]) - 0.4).abs() < 1e-9);
        assert_eq!(p.domain_affinity(&["biology".into(), "ml".into()]), 1.0);
        assert_eq!(p.domain_affinity(&[]), 0.0);
    }

    #[test]
    fn test_personal_score_combines_domain_and_memory() {
        let mut p = UserProfile::new("u1");
        p.preferences.preferred_domains = vec!["search".into()];
        let cfg = MemoryConfig::default();
        let mut mem = ConversationMemory::new("u1");
        mem.remember(
            MemoryItem::new("hybrid search ranking", 1.0, MemorySource::Conversation, 0),
            &cfg,
            0,
        );
        let ctx = PersonalContext {
            profile: &p,
            memory: Some(&mem),
            memory_config: &cfg,
            now: 0,
        };
        let s = ctx.personal_score(&["search".into()], "hybrid search ranking");
        assert!((s - 1.0).abs() < 1e-9);
        let s = ctx.personal_score(&[], "unrelated gardening text");
        assert_eq!(s, 0.0);
        let s = ctx.personal_score(&["search".into()], "unrelated gardening text");
        assert!((s - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_detail_level_budget_and_parse() {
        assert_eq!(DetailLevel::Brief.sentence_budget(), 2);
        assert_eq!(DetailLevel::default().sentence_budget(), 3);
        assert_eq!("detailed".parse::<DetailLevel>().unwrap(), DetailLevel::Detailed);
        assert!("verbose".parse::<DetailLevel>().is_err());
    }
}
