//! Read-side DTOs served by the REST routes.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{dto::game::Round, state::state_machine::SessionStatus};

/// Summary of the couple's running session, if any.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionSummary {
    pub session_id: Uuid,
    pub status: SessionStatus,
    /// `None` while the invitation is pending.
    pub round: Option<Round>,
    pub category_id: i64,
    /// 1-based, `None` while the invitation is pending.
    pub current_question_number: Option<usize>,
    pub total_questions: usize,
    pub partner_name: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub expires_at: i64,
    pub last_activity_at: i64,
    pub can_continue: bool,
}

/// Query string of the history route.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Zero-based page, negative values are treated as 0.
    pub page: Option<i64>,
    /// Page size, clamped to 1..=50 (default 10).
    pub size: Option<i64>,
    /// `oldest` for ascending order, anything else sorts newest first.
    pub sort: Option<String>,
    /// `self`, `partner` or `all`.
    pub winner: Option<String>,
}

/// Outcome of a completed game from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameOutcome {
    Win,
    Loss,
    Draw,
}

impl GameOutcome {
    /// Compare the caller's score to the partner's.
    pub fn from_scores(mine: u32, partner: u32) -> Self {
        match mine.cmp(&partner) {
            std::cmp::Ordering::Greater => GameOutcome::Win,
            std::cmp::Ordering::Less => GameOutcome::Loss,
            std::cmp::Ordering::Equal => GameOutcome::Draw,
        }
    }
}

/// One completed game in the history.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub session_id: Uuid,
    /// Completion time (falling back to start, then creation), epoch milliseconds.
    pub completed_at: i64,
    pub my_score: u32,
    pub partner_score: u32,
    pub partner_name: String,
    pub category_id: i64,
    pub result: GameOutcome,
}

/// Page of [`HistoryItem`]s.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub items: Vec<HistoryItem>,
    pub page: usize,
    pub size: usize,
    pub total_elements: usize,
    pub total_pages: usize,
    pub has_next: bool,
}

impl HistoryPage {
    /// Empty page echoing the normalized paging parameters.
    pub fn empty(page: usize, size: usize) -> Self {
        Self {
            items: Vec::new(),
            page,
            size,
            total_elements: 0,
            total_pages: 0,
            has_next: false,
        }
    }
}

/// Aggregate statistics of the caller's couple.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub games_played: usize,
    /// Mean of the caller's scores, rounded half-up to two decimals.
    pub average_score: f64,
    pub best_score: u32,
    /// Consecutive local calendar days with a completed game, counted from the latest one.
    pub streak_days: u32,
    /// Percentage of answered invitations that were accepted, two decimals.
    pub invitation_acceptance_rate: f64,
    /// Mean seconds between invitation and acceptance, two decimals.
    pub avg_invitation_response_seconds: f64,
}

impl DashboardStats {
    /// Statistics of a couple that never played.
    pub fn empty() -> Self {
        Self {
            games_played: 0,
            average_score: 0.0,
            best_score: 0,
            streak_days: 0,
            invitation_acceptance_rate: 0.0,
            avg_invitation_response_seconds: 0.0,
        }
    }
}

/// Achievement unlocked by a couple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub code: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    /// Epoch milliseconds of the completion that unlocked the badge.
    pub earned_at: Option<i64>,
}

/// Body of the badges route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BadgesResponse {
    pub badges: Vec<Badge>,
}
