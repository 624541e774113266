//! User profile and conversation memory management, shared by
//! `hrag profile|memory` and the `/api/users/{id}` routes.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use hierarag_core::memory::ConversationMemory;
use hierarag_core::models::MemoryItem;
use hierarag_core::profile::{DetailLevel, UserProfile};
use hierarag_core::store::UserStateStore;
use hierarag_core::RagError;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Partial profile update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub personalization_level: Option<f64>,
    #[serde(default)]
    pub detail_level: Option<DetailLevel>,
    #[serde(default)]
    pub prefers_examples: Option<bool>,
    #[serde(default)]
    pub preferred_domains: Option<Vec<String>>,
    /// Domain levels to set outright.
    #[serde(default)]
    pub expertise: BTreeMap<String, f64>,
}

fn check_unit(name: &str, v: f64) -> Result<(), RagError> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(RagError::InvalidInput(format!(
            "{} must be between 0 and 1, got {}",
            name, v
        )))
    }
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<(), RagError> {
        if let Some(level) = self.personalization_level {
            check_unit("personalization_level", level)?;
        }
        for (domain, level) in &self.expertise {
            if domain.trim().is_empty() {
                return Err(RagError::InvalidInput("expertise domain must not be empty".into()));
            }
            check_unit(&format!("expertise.{}", domain), *level)?;
        }
        Ok(())
    }

    pub fn apply(&self, profile: &mut UserProfile) {
        if let Some(level) = self.personalization_level {
            profile.set_personalization_level(level);
        }
        if let Some(detail) = self.detail_level {
            profile.preferences.detail_level = detail;
        }
        if let Some(examples) = self.prefers_examples {
            profile.preferences.prefers_examples = examples;
        }
        if let Some(domains) = &self.preferred_domains {
            profile.preferences.preferred_domains = domains
                .iter()
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .collect();
        }
        for (domain, level) in &self.expertise {
            profile
                .expertise
                .insert(domain.trim().to_lowercase(), *level);
        }
    }
}

/// The stored profile, or a fresh default one.
pub async fn get_profile<S: UserStateStore + ?Sized>(store: &S, user_id: &str) -> Result<UserProfile> {
    Ok(store
        .load_profile(user_id)
        .await?
        .unwrap_or_else(|| UserProfile::new(user_id)))
}

pub async fn update_profile<S: UserStateStore + ?Sized>(
    store: &S,
    user_id: &str,
    update: &ProfileUpdate,
) -> Result<UserProfile> {
    update.validate()?;
    let mut profile = get_profile(store, user_id).await?;
    update.apply(&mut profile);
    profile.updated_at = chrono::Utc::now().timestamp();
    store.save_profile(&profile).await?;
    tracing::info!(user_id, "profile updated");
    Ok(profile)
}

/// Memory view returned by `GET /api/users/{id}/memory`.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryView {
    pub user_id: String,
    pub short_term: Vec<MemoryItem>,
    pub long_term: Vec<MemoryItem>,
}

impl From<ConversationMemory> for MemoryView {
    fn from(m: ConversationMemory) -> Self {
        Self {
            user_id: m.user_id,
            short_term: m.short_term.into_iter().collect(),
            long_term: m.long_term,
        }
    }
}

pub async fn get_memory<S: UserStateStore + ?Sized>(store: &S, user_id: &str) -> Result<MemoryView> {
    Ok(store
        .load_memory(user_id)
        .await?
        .unwrap_or_else(|| ConversationMemory::new(user_id))
        .into())
}

async fn open(config: &Config) -> Result<SqliteStore> {
    Ok(SqliteStore::new(db::connect(config).await?))
}

pub async fn run_profile_show(config: &Config, user_id: &str) -> Result<()> {
    let store = open(config).await?;
    let profile = get_profile(&store, user_id).await;
    store.close().await;
    print_profile(&profile?);
    Ok(())
}

pub async fn run_profile_set(config: &Config, user_id: &str, update: ProfileUpdate) -> Result<()> {
    let store = open(config).await?;
    let profile = update_profile(&store, user_id, &update).await;
    store.close().await;
    print_profile(&profile?);
    Ok(())
}

fn print_profile(profile: &UserProfile) {
    println!("profile {}", profile.user_id);
    println!("  personalization: {:.2}", profile.personalization_level);
    println!("  detail level: {}", profile.preferences.detail_level.as_str());
    println!("  prefers examples: {}", profile.preferences.prefers_examples);
    if !profile.preferences.preferred_domains.is_empty() {
        println!(
            "  preferred domains: {}",
            profile.preferences.preferred_domains.join(", ")
        );
    }
    if !profile.expertise.is_empty() {
        println!("  expertise:");
        for (domain, level) in &profile.expertise {
            println!("    {:<20} {:.2}", domain, level);
        }
    }
}

pub async fn run_memory_show(config: &Config, user_id: &str, json: bool) -> Result<()> {
    let store = open(config).await?;
    let view = get_memory(&store, user_id).await;
    store.close().await;
    let view = view?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("memory {}", view.user_id);
    for (label, items) in [("short-term", &view.short_term), ("long-term", &view.long_term)] {
        println!("  {} ({})", label, items.len());
        for item in items.iter() {
            let when = chrono::DateTime::from_timestamp(item.timestamp, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!(
                "    [{:.2}{}] {} {}",
                item.importance,
                if item.verified { ", verified" } else { "" },
                when,
                item.content
            );
        }
    }
    Ok(())
}
