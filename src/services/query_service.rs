//! Read-only projections over a couple's sessions: active summary, history, stats and badges.

use std::{cmp::Ordering, collections::HashMap, time::SystemTime};

use time::{Date, OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::{
    dao::models::{GameSessionEntity, QUESTIONS_PER_GAME},
    dto::{
        epoch_millis,
        game::Round,
        query::{
            ActiveSessionSummary, Badge, DashboardStats, GameOutcome, HistoryItem, HistoryPage,
            HistoryQuery,
        },
    },
    error::ServiceError,
    services::game_service,
    state::{SharedState, state_machine::SessionStatus},
};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 50;

/// Summary of the running session of the user's couple.
pub async fn active_session_summary(
    state: &SharedState,
    user_id: Uuid,
) -> Result<Option<ActiveSessionSummary>, ServiceError> {
    let Some(session) = game_service::get_latest_active_session_for_user(state, user_id).await?
    else {
        return Ok(None);
    };

    let partner_id = session.partner_of(user_id).ok_or_else(|| {
        ServiceError::InvalidState("User is not part of this game session".into())
    })?;
    let partner_name = user_name(state, partner_id).await?;

    let (round, current_question_number) = match session.status {
        SessionStatus::Round1 => (Some(Round::Round1), Some(session.safe_question_index() + 1)),
        SessionStatus::Round2 => (Some(Round::Round2), Some(session.safe_question_index() + 1)),
        _ => (None, None),
    };
    let total_questions = match session.question_order.len() {
        0 => QUESTIONS_PER_GAME,
        len => len,
    };

    Ok(Some(ActiveSessionSummary {
        session_id: session.id,
        status: session.status,
        round,
        category_id: session.category_id,
        current_question_number,
        total_questions,
        partner_name,
        created_at: epoch_millis(session.created_at),
        started_at: session.started_at.map(epoch_millis),
        completed_at: session.completed_at.map(epoch_millis),
        expires_at: epoch_millis(session.expires_at),
        last_activity_at: epoch_millis(session.last_activity_at),
        can_continue: true,
    }))
}

/// Page through the user's completed games.
pub async fn history(
    state: &SharedState,
    user_id: Uuid,
    query: HistoryQuery,
) -> Result<HistoryPage, ServiceError> {
    let (page, size) = normalize_paging(query.page, query.size);
    let mut sessions = completed_sessions(state, user_id).await?;
    sort_history(&mut sessions, query.sort.as_deref());

    let winner = query
        .winner
        .as_deref()
        .map(|value| value.trim().to_lowercase())
        .unwrap_or_default();
    let filtered: Vec<GameSessionEntity> = sessions
        .into_iter()
        .filter(|session| matches_winner(session, user_id, &winner))
        .collect();

    let total_elements = filtered.len();
    if total_elements == 0 {
        return Ok(HistoryPage::empty(page, size));
    }

    let from = page.saturating_mul(size).min(total_elements);
    let to = from.saturating_add(size).min(total_elements);

    let mut names = HashMap::new();
    let mut items = Vec::with_capacity(to - from);
    for session in &filtered[from..to] {
        let partner_id = session.partner_of(user_id).unwrap_or(session.player2_id);
        let partner_name = match names.get(&partner_id) {
            Some(name) => String::clone(name),
            None => {
                let name = user_name(state, partner_id).await?;
                names.insert(partner_id, name.clone());
                name
            }
        };
        let (my_score, partner_score) = session.scores_for(user_id);
        items.push(HistoryItem {
            session_id: session.id,
            completed_at: epoch_millis(session.reference_time()),
            my_score,
            partner_score,
            partner_name,
            category_id: session.category_id,
            result: GameOutcome::from_scores(my_score, partner_score),
        });
    }

    Ok(HistoryPage {
        items,
        page,
        size,
        total_elements,
        total_pages: total_elements.div_ceil(size),
        has_next: to < total_elements,
    })
}

/// Aggregate statistics of the user's couple.
pub async fn dashboard_stats(
    state: &SharedState,
    user_id: Uuid,
) -> Result<DashboardStats, ServiceError> {
    let sessions = user_sessions(state, user_id).await?;
    Ok(compute_stats(&sessions, user_id, state.config().calendar_offset()))
}

/// Badges earned by the user's couple.
pub async fn badges(state: &SharedState, user_id: Uuid) -> Result<Vec<Badge>, ServiceError> {
    let sessions = user_sessions(state, user_id).await?;
    let stats = compute_stats(&sessions, user_id, state.config().calendar_offset());

    let mut completed: Vec<&GameSessionEntity> = sessions
        .iter()
        .filter(|session| session.status == SessionStatus::Completed)
        .collect();
    completed.sort_by_key(|session| session.reference_time());

    Ok(evaluate_badges(&stats, &completed, user_id))
}

fn compute_stats(
    sessions: &[GameSessionEntity],
    user_id: Uuid,
    offset: UtcOffset,
) -> DashboardStats {
    let completed: Vec<&GameSessionEntity> = sessions
        .iter()
        .filter(|session| session.status == SessionStatus::Completed)
        .collect();

    let my_scores: Vec<u32> = completed
        .iter()
        .map(|session| session.scores_for(user_id).0)
        .collect();
    let average_score = if my_scores.is_empty() {
        0.0
    } else {
        my_scores.iter().map(|score| f64::from(*score)).sum::<f64>() / my_scores.len() as f64
    };

    let responded = sessions
        .iter()
        .filter(|session| session.status != SessionStatus::Invited)
        .count();
    let accepted: Vec<&GameSessionEntity> = sessions
        .iter()
        .filter(|session| session.status.was_accepted())
        .collect();
    let acceptance_rate = if responded == 0 {
        0.0
    } else {
        accepted.len() as f64 / responded as f64 * 100.0
    };

    let response_times: Vec<f64> = accepted
        .iter()
        .filter_map(|session| {
            session
                .started_at?
                .duration_since(session.created_at)
                .ok()
                .map(|elapsed| elapsed.as_secs_f64())
        })
        .collect();
    let avg_response = if response_times.is_empty() {
        0.0
    } else {
        response_times.iter().sum::<f64>() / response_times.len() as f64
    };

    DashboardStats {
        games_played: completed.len(),
        average_score: round_half_up(average_score),
        best_score: my_scores.iter().copied().max().unwrap_or(0),
        streak_days: streak_days(
            completed.iter().map(|session| session.reference_time()),
            offset,
        ),
        invitation_acceptance_rate: round_half_up(acceptance_rate),
        avg_invitation_response_seconds: round_half_up(avg_response),
    }
}

/// Badges unlocked by `stats`; `completed` must be sorted by reference time, oldest first.
fn evaluate_badges(
    stats: &DashboardStats,
    completed: &[&GameSessionEntity],
    user_id: Uuid,
) -> Vec<Badge> {
    let nth = |n: usize| {
        completed
            .get(n - 1)
            .map(|session| epoch_millis(session.reference_time()))
    };
    let latest = completed
        .last()
        .map(|session| epoch_millis(session.reference_time()));

    let mut badges = Vec::new();
    if stats.games_played >= 1 {
        badges.push(Badge {
            code: "FIRST_GAME",
            title: "First Spark",
            description: "Complete your first game together.",
            earned_at: nth(1),
        });
    }
    if stats.games_played >= 5 {
        badges.push(Badge {
            code: "FIVE_GAMES",
            title: "Rhythm Builders",
            description: "Complete 5 games as a couple.",
            earned_at: nth(5),
        });
    }
    if stats.games_played >= 10 {
        badges.push(Badge {
            code: "TEN_GAMES",
            title: "Deeply In Sync",
            description: "Complete 10 games as a couple.",
            earned_at: nth(10),
        });
    }
    if stats.best_score >= 7 {
        badges.push(Badge {
            code: "SHARP_GUESSER",
            title: "Sharp Guesser",
            description: "Score at least 7 in a single game.",
            earned_at: completed
                .iter()
                .find(|session| session.scores_for(user_id).0 >= 7)
                .map(|session| epoch_millis(session.reference_time())),
        });
    }
    if stats.streak_days >= 3 {
        badges.push(Badge {
            code: "STREAK_3",
            title: "Hot Streak",
            description: "Play on 3 consecutive days.",
            earned_at: latest,
        });
    }
    if stats.invitation_acceptance_rate >= 70.0 && stats.games_played >= 3 {
        badges.push(Badge {
            code: "RESPONSIVE_COUPLE",
            title: "Responsive Couple",
            description: "Keep your invitation acceptance rate above 70%.",
            earned_at: latest,
        });
    }
    badges
}

/// Consecutive calendar days, counted back from the most recent completion.
fn streak_days(completions: impl Iterator<Item = SystemTime>, offset: UtcOffset) -> u32 {
    let mut days: Vec<Date> = completions
        .map(|time| OffsetDateTime::from(time).to_offset(offset).date())
        .collect();
    days.sort_unstable_by(|a, b| b.cmp(a));
    days.dedup();

    let Some((&latest, rest)) = days.split_first() else {
        return 0;
    };

    let mut streak = 1;
    let mut expected = latest.previous_day();
    for day in rest {
        if Some(*day) != expected {
            break;
        }
        streak += 1;
        expected = day.previous_day();
    }
    streak
}

fn normalize_paging(page: Option<i64>, size: Option<i64>) -> (usize, usize) {
    let page = usize::try_from(page.unwrap_or(0).max(0)).unwrap_or(usize::MAX);
    let size = size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE) as usize;
    (page, size)
}

fn sort_history(sessions: &mut [GameSessionEntity], sort: Option<&str>) {
    let oldest_first = sort.is_some_and(|value| value.eq_ignore_ascii_case("oldest"));
    sessions.sort_by(|a, b| {
        let ordering = a
            .reference_time()
            .cmp(&b.reference_time())
            .then_with(|| a.created_at.cmp(&b.created_at));
        if oldest_first {
            ordering
        } else {
            ordering.reverse()
        }
    });
}

fn matches_winner(session: &GameSessionEntity, user_id: Uuid, winner: &str) -> bool {
    let (mine, partner) = session.scores_for(user_id);
    match winner {
        "self" => mine.cmp(&partner) == Ordering::Greater,
        "partner" => mine.cmp(&partner) == Ordering::Less,
        _ => true,
    }
}

/// Round half-up to two decimals, ignoring binary noise below 1e-6 of a cent.
fn round_half_up(value: f64) -> f64 {
    let cents = ((value * 100.0) * 1e6).round() / 1e6;
    cents.round() / 100.0
}

async fn user_sessions(
    state: &SharedState,
    user_id: Uuid,
) -> Result<Vec<GameSessionEntity>, ServiceError> {
    user_name(state, user_id).await?;
    let Some(couple) = state.directory().find_couple_for_user(user_id).await? else {
        return Ok(Vec::new());
    };
    let store = state.require_session_store().await?;
    Ok(store
        .find_couple_sessions(couple.id)
        .await?
        .into_iter()
        .filter(|session| session.has_participant(user_id))
        .collect())
}

async fn completed_sessions(
    state: &SharedState,
    user_id: Uuid,
) -> Result<Vec<GameSessionEntity>, ServiceError> {
    Ok(user_sessions(state, user_id)
        .await?
        .into_iter()
        .filter(|session| session.status == SessionStatus::Completed)
        .collect())
}

async fn user_name(state: &SharedState, user_id: Uuid) -> Result<String, ServiceError> {
    state
        .directory()
        .find_user(user_id)
        .await?
        .map(|user| user.name)
        .ok_or_else(|| ServiceError::NotFound(format!("User not found: {user_id}")))
}
