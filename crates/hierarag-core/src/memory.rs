//! Two-tier conversation memory.
//!
//! New items land in a bounded short-term queue. When the queue overflows,
//! the oldest item is promoted to long-term memory if it is important (or
//! verified) and dropped otherwise. Long-term memory is bounded too; it
//! evicts the item with the lowest decayed importance.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::models::{clamp_unit, MemoryItem};
use crate::text::{jaccard, normalize, terms};

const SECONDS_PER_DAY: f64 = 86_400.0;
const VERIFIED_BOOST: f64 = 1.25;

/// Capacity and decay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub short_term_capacity: usize,
    pub long_term_capacity: usize,
    /// Minimum importance for promotion of unverified items.
    pub promotion_threshold: f64,
    /// Decay time constant in days.
    pub half_life_days: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: 10,
            long_term_capacity: 200,
            promotion_threshold: 0.6,
            half_life_days: 30.0,
        }
    }
}

/// Importance after exponential decay, boosted when verified.
///
/// `importance · e^(−age_days / half_life)`, ×1.25 if verified, clamped.
/// Items from the future are treated as age 0.
pub fn effective_importance(item: &MemoryItem, half_life_days: f64, now: i64) -> f64 {
    let age_days = ((now - item.timestamp).max(0) as f64) / SECONDS_PER_DAY;
    let decay = if half_life_days > 0.0 {
        (-age_days / half_life_days).exp()
    } else {
        1.0
    };
    let boost = if item.verified { VERIFIED_BOOST } else { 1.0 };
    clamp_unit(item.importance * decay * boost)
}

/// Memory for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub user_id: String,
    pub short_term: VecDeque<MemoryItem>,
    pub long_term: Vec<MemoryItem>,
}

impl ConversationMemory {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.short_term.len() + self.long_term.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn items(&self) -> impl Iterator<Item = &MemoryItem> {
        self.short_term.iter().chain(self.long_term.iter())
    }

    /// Add an item to short-term memory, overflowing into long-term.
    pub fn remember(&mut self, item: MemoryItem, config: &MemoryConfig, now: i64) {
        self.short_term.push_back(item);
        while self.short_term.len() > config.short_term_capacity {
            let Some(oldest) = self.short_term.pop_front() else {
                break;
            };
            if qualifies(&oldest, config) {
                self.promote(oldest, config, now);
            } else {
                tracing::trace!(user_id = %self.user_id, item = %oldest.id, "dropped short-term memory");
            }
        }
    }

    /// Promote every qualifying short-term item; the rest stay short-term.
    pub fn consolidate(&mut self, config: &MemoryConfig, now: i64) {
        let pending: Vec<MemoryItem> = self.short_term.drain(..).collect();
        for item in pending {
            if qualifies(&item, config) {
                self.promote(item, config, now);
            } else {
                self.short_term.push_back(item);
            }
        }
    }

    /// The `k` items most relevant to `query`, ranked by
    /// `jaccard(terms) × effective_importance`. Items with no term overlap
    /// are never returned. Access counts of returned items are incremented.
    pub fn recall(
        &mut self,
        query: &str,
        k: usize,
        config: &MemoryConfig,
        now: i64,
    ) -> Vec<MemoryItem> {
        let q = terms(query);
        let mut scored: Vec<(f64, String)> = self
            .items()
            .filter_map(|item| {
                let sim = jaccard(&q, &terms(&item.content));
                if sim <= 0.0 {
                    return None;
                }
                let score = sim * effective_importance(item, config.half_life_days, now);
                Some((score, item.id.clone()))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        scored.truncate(k);

        let mut out = Vec::with_capacity(scored.len());
        for (_, id) in scored {
            if let Some(item) = self
                .short_term
                .iter_mut()
                .chain(self.long_term.iter_mut())
                .find(|i| i.id == id)
            {
                item.access_count = item.access_count.saturating_add(1);
                out.push(item.clone());
            }
        }
        out
    }

    /// Strongest `effective_importance × jaccard` match against `text`, in `[0, 1]`.
    pub fn affinity(&self, text: &str, config: &MemoryConfig, now: i64) -> f64 {
        let t = terms(text);
        self.items()
            .map(|item| {
                jaccard(&t, &terms(&item.content))
                    * effective_importance(item, config.half_life_days, now)
            })
            .fold(0.0, f64::max)
    }

    fn promote(&mut self, item: MemoryItem, config: &MemoryConfig, now: i64) {
        let key = normalize(&item.content);
        if let Some(existing) = self
            .long_term
            .iter_mut()
            .find(|e| normalize(&e.content) == key)
        {
            existing.importance = existing.importance.max(item.importance);
            existing.verified |= item.verified;
            existing.timestamp = existing.timestamp.max(item.timestamp);
            existing.access_count = existing.access_count.saturating_add(item.access_count);
        } else {
            self.long_term.push(item);
        }

        while self.long_term.len() > config.long_term_capacity {
            let weakest = self
                .long_term
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    effective_importance(a, config.half_life_days, now)
                        .partial_cmp(&effective_importance(b, config.half_life_days, now))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.timestamp.cmp(&b.timestamp))
                })
                .map(|(i, _)| i);
            match weakest {
                Some(i) => {
                    self.long_term.remove(i);
                }
                None => break,
            }
        }
    }
}

fn qualifies(item: &MemoryItem, config: &MemoryConfig) -> bool {
    item.verified || item.importance >= config.promotion_threshold
}
