//! Core data models for the gateway

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Who the explanation is written for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AudienceType {
    Parent,
    Partner,
    Friend,
    Child,
    Boss,
}

impl AudienceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudienceType::Parent => "parent",
            AudienceType::Partner => "partner",
            AudienceType::Friend => "friend",
            AudienceType::Child => "child",
            AudienceType::Boss => "boss",
        }
    }
}

impl fmt::Display for AudienceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the technical text was entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InputMethod {
    Text,
    Voice,
}

/// Up or down vote on a public translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Up,
    Down,
}

/// A user as far as the gateway is concerned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    /// Encrypted upstream credential envelope
    #[serde(skip_serializing)]
    pub encrypted_api_key: Option<String>,
    pub total_xp: u64,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            encrypted_api_key: None,
            total_xp: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Translation submission
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    pub technical_text: String,
    pub audience_type: AudienceType,
    pub model: Option<String>,
    pub is_public: Option<bool>,
    pub audio_file_id: Option<String>,
}

impl TranslationRequest {
    pub fn new(technical_text: impl Into<String>, audience_type: AudienceType) -> Self {
        Self {
            technical_text: technical_text.into(),
            audience_type,
            model: None,
            is_public: None,
            audio_file_id: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn public(mut self, is_public: bool) -> Self {
        self.is_public = Some(is_public);
        self
    }
}

/// Stored translation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub id: Uuid,
    pub user_id: String,
    pub technical_text: String,
    pub simplified_text: String,
    pub audience_type: AudienceType,
    pub input_method: InputMethod,
    pub audio_file_id: Option<String>,
    pub is_public: bool,
    pub ai_model: String,
    pub view_count: u64,
    pub upvotes_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields exposed on share links and the public feed
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicTranslation {
    pub id: Uuid,
    pub technical_text: String,
    pub simplified_text: String,
    pub audience_type: AudienceType,
    pub ai_model: String,
    pub view_count: u64,
    pub upvotes_count: i64,
    pub created_at: DateTime<Utc>,
    pub author: Option<String>,
}

impl PublicTranslation {
    pub fn from_translation(translation: &Translation, author: Option<String>) -> Self {
        Self {
            id: translation.id,
            technical_text: translation.technical_text.clone(),
            simplified_text: translation.simplified_text.clone(),
            audience_type: translation.audience_type,
            ai_model: translation.ai_model.clone(),
            view_count: translation.view_count,
            upvotes_count: translation.upvotes_count,
            created_at: translation.created_at,
            author,
        }
    }
}

/// Practice challenge
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub title: String,
    pub xp_reward: u64,
    pub is_active: bool,
}

/// Parsed evaluation returned by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PracticeFeedback {
    pub score: u32,
    pub feedback: String,
    pub suggestions: Vec<String>,
}

/// Stored practice attempt
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Practice {
    pub id: Uuid,
    pub user_id: String,
    pub user_input: String,
    pub input_method: InputMethod,
    pub feedback_text: String,
    pub score: u32,
    pub suggestions: Vec<String>,
    pub challenge_prompt: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a practice submission
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PracticeOutcome {
    pub practice: Practice,
    pub feedback: PracticeFeedback,
    pub xp_earned: u64,
}

/// One leaderboard row
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub name: String,
    pub initials: String,
    pub xp: u64,
    pub is_current_user: bool,
}

/// Leaderboard window. A user is ranked when their record changed inside it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardPeriod {
    Today,
    Week,
    Month,
    #[default]
    AllTime,
}

impl LeaderboardPeriod {
    /// Earliest activity time that still counts, `None` for all time
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            LeaderboardPeriod::Today => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.and_utc()),
            LeaderboardPeriod::Week => Some(now - Duration::days(7)),
            LeaderboardPeriod::Month => now.checked_sub_months(Months::new(1)),
            LeaderboardPeriod::AllTime => None,
        }
    }
}

/// Counters shown on the caller's dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub translations: usize,
    pub practice_sessions: usize,
    /// Translations the caller made public
    pub saved_examples: usize,
    /// Rounded mean practice score, 0 without practices
    pub average_score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Translation,
    Practice,
}

/// One row of the recent activity list
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<AudienceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Settings view; the stored key itself is never returned
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub id: String,
    pub name: String,
    pub has_api_key: bool,
}

/// Caller's vote and the resulting count
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VoteStatus {
    pub vote_type: Option<VoteType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upvotes_count: Option<i64>,
}

/// Up to two uppercase initials from a display name
pub fn initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|part| part.chars().next())
        .flat_map(|c| c.to_uppercase())
        .take(2)
        .collect()
}
