//! Persistence collaborator
//!
//! The relational store lives outside this crate. [`Repository`] is the
//! contract the gateway needs from it; [`InMemoryRepository`] backs tests and
//! single-instance runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::credentials::CredentialSource;
use crate::core::errors::{GatewayError, Result};
use crate::core::models::{Challenge, DashboardStats, Practice, Translation, User, VoteType};
use crate::core::votes::{apply_vote, VoteOutcome};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;

    /// Create the user on first sight; an existing user is returned unchanged.
    async fn ensure_user(&self, user_id: &str, name: &str) -> Result<User>;

    /// Store or clear the encrypted upstream credential
    async fn set_encrypted_api_key(&self, user_id: &str, envelope: Option<String>) -> Result<()>;

    async fn add_xp(&self, user_id: &str, xp: u64) -> Result<()>;

    /// Users ordered by XP, highest first. `active_since` keeps only users
    /// whose record changed at or after that time.
    async fn top_users(
        &self,
        limit: usize,
        active_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<User>>;

    async fn insert_translation(&self, translation: Translation) -> Result<Translation>;

    async fn get_translation(&self, id: Uuid) -> Result<Option<Translation>>;

    async fn set_visibility(&self, id: Uuid, is_public: bool) -> Result<Translation>;

    /// Delete a translation and its votes. Returns false if it did not exist.
    async fn delete_translation(&self, id: Uuid) -> Result<bool>;

    /// A user's translations, newest first
    async fn list_translations(&self, user_id: &str, offset: usize, limit: usize)
        -> Result<Vec<Translation>>;

    /// Public translations, newest first
    async fn public_translations(&self, limit: usize) -> Result<Vec<Translation>>;

    async fn increment_view_count(&self, id: Uuid) -> Result<()>;

    async fn get_vote(&self, user_id: &str, translation_id: Uuid) -> Result<Option<VoteType>>;

    /// Apply a vote request atomically. Returns the outcome and the new upvote count.
    async fn cast_vote(
        &self,
        user_id: &str,
        translation_id: Uuid,
        requested: VoteType,
    ) -> Result<(VoteOutcome, i64)>;

    async fn get_challenge(&self, id: &str) -> Result<Option<Challenge>>;

    /// Active challenges, cheapest reward first
    async fn active_challenges(&self) -> Result<Vec<Challenge>>;

    async fn insert_practice(&self, practice: Practice) -> Result<Practice>;

    async fn get_practice(&self, id: Uuid) -> Result<Option<Practice>>;

    /// A user's practice attempts, newest first
    async fn list_practices(&self, user_id: &str, limit: usize) -> Result<Vec<Practice>>;

    async fn dashboard_stats(&self, user_id: &str) -> Result<DashboardStats>;
}

/// Lets any repository serve as the credential source
pub struct RepositoryCredentials(pub Arc<dyn Repository>);

#[async_trait]
impl CredentialSource for RepositoryCredentials {
    async fn encrypted_credential(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .0
            .get_user(user_id)
            .await?
            .and_then(|user| user.encrypted_api_key))
    }
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<String, User>,
    translations: HashMap<Uuid, Translation>,
    votes: HashMap<(String, Uuid), VoteType>,
    challenges: HashMap<String, Challenge>,
    practices: Vec<Practice>,
}

const DEFAULT_CHALLENGES: &[(&str, &str, u64)] = &[
    ("c1", "Explain API to a Grandparent", 50),
    ("c2", "Explain Cloud Computing", 50),
    ("c3", "Explain Encryption", 100),
    ("c4", "Explain Blockchain", 150),
];

/// In-memory repository
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository preloaded with the starter practice challenges
    pub async fn with_default_challenges() -> Self {
        let repository = Self::new();
        for (id, title, xp_reward) in DEFAULT_CHALLENGES {
            repository
                .upsert_challenge(Challenge {
                    id: id.to_string(),
                    title: title.to_string(),
                    xp_reward: *xp_reward,
                    is_active: true,
                })
                .await;
        }
        repository
    }

    pub async fn upsert_user(&self, user: User) {
        self.tables.write().await.users.insert(user.id.clone(), user);
    }

    pub async fn upsert_challenge(&self, challenge: Challenge) {
        self.tables
            .write()
            .await
            .challenges
            .insert(challenge.id.clone(), challenge);
    }

    pub async fn practices_for(&self, user_id: &str) -> Vec<Practice> {
        self.tables
            .read()
            .await
            .practices
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn translation_count(&self) -> usize {
        self.tables.read().await.translations.len()
    }
}

fn newest_first(translations: &mut [Translation]) {
    translations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(user_id).cloned())
    }

    async fn ensure_user(&self, user_id: &str, name: &str) -> Result<User> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| User::new(user_id, name));
        Ok(user.clone())
    }

    async fn set_encrypted_api_key(&self, user_id: &str, envelope: Option<String>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(user_id)
            .ok_or(GatewayError::NotFound { entity: "User" })?;
        user.encrypted_api_key = envelope;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn add_xp(&self, user_id: &str, xp: u64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(user_id)
            .ok_or(GatewayError::NotFound { entity: "User" })?;
        user.total_xp += xp;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn top_users(
        &self,
        limit: usize,
        active_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<User>> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables
            .users
            .values()
            .filter(|user| active_since.map_or(true, |since| user.updated_at >= since))
            .cloned()
            .collect();
        users.sort_by(|a, b| b.total_xp.cmp(&a.total_xp).then_with(|| a.name.cmp(&b.name)));
        users.truncate(limit);
        Ok(users)
    }

    async fn insert_translation(&self, translation: Translation) -> Result<Translation> {
        self.tables
            .write()
            .await
            .translations
            .insert(translation.id, translation.clone());
        Ok(translation)
    }

    async fn get_translation(&self, id: Uuid) -> Result<Option<Translation>> {
        Ok(self.tables.read().await.translations.get(&id).cloned())
    }

    async fn set_visibility(&self, id: Uuid, is_public: bool) -> Result<Translation> {
        let mut tables = self.tables.write().await;
        let translation = tables
            .translations
            .get_mut(&id)
            .ok_or(GatewayError::NotFound { entity: "Translation" })?;
        translation.is_public = is_public;
        translation.updated_at = Utc::now();
        Ok(translation.clone())
    }

    async fn delete_translation(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let existed = tables.translations.remove(&id).is_some();
        tables.votes.retain(|(_, translation_id), _| *translation_id != id);
        Ok(existed)
    }

    async fn list_translations(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Translation>> {
        let tables = self.tables.read().await;
        let mut owned: Vec<Translation> = tables
            .translations
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut owned);
        Ok(owned.into_iter().skip(offset).take(limit).collect())
    }

    async fn public_translations(&self, limit: usize) -> Result<Vec<Translation>> {
        let tables = self.tables.read().await;
        let mut public: Vec<Translation> = tables
            .translations
            .values()
            .filter(|t| t.is_public)
            .cloned()
            .collect();
        newest_first(&mut public);
        public.truncate(limit);
        Ok(public)
    }

    async fn increment_view_count(&self, id: Uuid) -> Result<()> {
        if let Some(translation) = self.tables.write().await.translations.get_mut(&id) {
            translation.view_count += 1;
        }
        Ok(())
    }

    async fn get_vote(&self, user_id: &str, translation_id: Uuid) -> Result<Option<VoteType>> {
        Ok(self
            .tables
            .read()
            .await
            .votes
            .get(&(user_id.to_string(), translation_id))
            .copied())
    }

    async fn cast_vote(
        &self,
        user_id: &str,
        translation_id: Uuid,
        requested: VoteType,
    ) -> Result<(VoteOutcome, i64)> {
        let mut tables = self.tables.write().await;
        if !tables.translations.contains_key(&translation_id) {
            return Err(GatewayError::NotFound { entity: "Translation" });
        }

        let key = (user_id.to_string(), translation_id);
        let outcome = apply_vote(tables.votes.get(&key).copied(), requested);
        match outcome.state {
            Some(vote) => tables.votes.insert(key, vote),
            None => tables.votes.remove(&key),
        };

        let translation = tables
            .translations
            .get_mut(&translation_id)
            .ok_or(GatewayError::NotFound { entity: "Translation" })?;
        translation.upvotes_count += outcome.delta;

        Ok((outcome, translation.upvotes_count))
    }

    async fn get_challenge(&self, id: &str) -> Result<Option<Challenge>> {
        Ok(self.tables.read().await.challenges.get(id).cloned())
    }

    async fn active_challenges(&self) -> Result<Vec<Challenge>> {
        let tables = self.tables.read().await;
        let mut active: Vec<Challenge> = tables
            .challenges
            .values()
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.xp_reward.cmp(&b.xp_reward).then_with(|| a.id.cmp(&b.id)));
        Ok(active)
    }

    async fn insert_practice(&self, practice: Practice) -> Result<Practice> {
        self.tables.write().await.practices.push(practice.clone());
        Ok(practice)
    }

    async fn get_practice(&self, id: Uuid) -> Result<Option<Practice>> {
        Ok(self
            .tables
            .read()
            .await
            .practices
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn list_practices(&self, user_id: &str, limit: usize) -> Result<Vec<Practice>> {
        let mut owned = self.practices_for(user_id).await;
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned.truncate(limit);
        Ok(owned)
    }

    async fn dashboard_stats(&self, user_id: &str) -> Result<DashboardStats> {
        let tables = self.tables.read().await;
        let (translations, saved_examples) = tables
            .translations
            .values()
            .filter(|t| t.user_id == user_id)
            .fold((0, 0), |(all, public), t| (all + 1, public + usize::from(t.is_public)));

        let scores: Vec<u32> = tables
            .practices
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.score)
            .collect();
        let average_score = if scores.is_empty() {
            0
        } else {
            let total: u64 = scores.iter().map(|&s| u64::from(s)).sum();
            (total as f64 / scores.len() as f64).round() as u32
        };

        Ok(DashboardStats {
            translations,
            practice_sessions: scores.len(),
            saved_examples,
            average_score,
        })
    }
}
