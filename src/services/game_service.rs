//! Session engine: invitation, both rounds, scoring and lazy expiry.
//!
//! Every mutation goes through [`SessionStore::replace_session`] guarded by the session version, so
//! two players acting at the same time can never advance a session twice.

use std::{collections::HashMap, sync::Arc, time::SystemTime};

use indexmap::IndexMap;
use rand::{rng, seq::SliceRandom};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{AnswerEntity, Choice, GameSessionEntity, QUESTIONS_PER_GAME, QuestionEntity},
        session_store::{InsertOutcome, SessionStore},
    },
    dto::game::{GameResultsPayload, GuessResultPayload, InvitationPayload, QuestionPayload, Round},
    error::ServiceError,
    state::{
        SharedState,
        state_machine::{self, SessionEvent, SessionStatus},
    },
};

const MAX_WRITE_ATTEMPTS: usize = 5;

/// A freshly created invitation and its recipient.
#[derive(Debug, Clone)]
pub struct Invitation {
    /// Payload delivered to the invitee.
    pub payload: InvitationPayload,
    /// Partner of the inviter.
    pub invitee_id: Uuid,
}

/// Session moved to Round 1 together with its first question.
#[derive(Debug, Clone)]
pub struct StartedGame {
    /// Session after acceptance.
    pub session: GameSessionEntity,
    /// Question at index 0.
    pub first_question: QuestionPayload,
}

/// Result of a Round 1 answer.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerOutcome {
    /// The player already answered this question; nothing changed.
    Duplicate,
    /// Recorded, the partner has not answered yet.
    Waiting,
    /// Both answered; the session moved to the returned question.
    Advanced(QuestionPayload),
    /// Both answered the last question; the session is now in Round 2.
    Round1Complete,
    /// Both answered but a concurrent call already advanced the session.
    Stale(Option<QuestionPayload>),
}

/// Result of advancing after a Round 2 question.
#[derive(Debug, Clone, PartialEq)]
pub enum Round2Advance {
    /// The session moved to the returned question.
    Next(QuestionPayload),
    /// The guessed question was the last one; scoring is due.
    Finished,
    /// A concurrent call already advanced past the guessed question.
    Stale,
}

/// Final scores and whether this call performed the completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedGame {
    /// Scores and closing message.
    pub results: GameResultsPayload,
    /// `false` when the session had already been completed by an earlier call.
    pub newly_completed: bool,
}

/// Create an invitation from `inviter_id` to their partner for `category_id`.
pub async fn create_invitation(
    state: &SharedState,
    inviter_id: Uuid,
    category_id: i64,
) -> Result<Invitation, ServiceError> {
    info!(%inviter_id, category_id, "creating game invitation");
    let store = state.require_session_store().await?;

    let inviter = state
        .directory()
        .find_user(inviter_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("User not found: {inviter_id}")))?;
    let couple = state
        .directory()
        .find_couple_for_user(inviter_id)
        .await?
        .ok_or_else(|| ServiceError::InvalidState("User must be in a couple to play".into()))?;
    let category = state
        .question_bank()
        .find_category(category_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Category not found: {category_id}")))?;
    let pool = state
        .question_bank()
        .questions_for_category(category_id)
        .await?;
    ensure_pool_size(pool.len())?;

    let ttl = state.config().session_ttl();

    for _ in 0..MAX_WRITE_ATTEMPTS {
        let now = SystemTime::now();
        if let Some(existing) = live_session_for_couple(&store, couple.id, now).await? {
            return Err(ServiceError::ActiveSessionExists(existing.id));
        }

        let session = GameSessionEntity {
            id: Uuid::new_v4(),
            couple_id: couple.id,
            player1_id: couple.user1_id,
            player2_id: couple.user2_id,
            status: SessionStatus::Invited,
            category_id,
            question_order: Vec::new(),
            current_question_index: 0,
            player1_score: None,
            player2_score: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            expires_at: now + ttl,
            last_activity_at: now,
            version: 0,
        };
        let session_id = session.id;

        match store.insert_session(session).await? {
            InsertOutcome::Inserted => {
                info!(%session_id, couple_id = %couple.id, "game session created");
                return Ok(Invitation {
                    payload: InvitationPayload::new(session_id, &category, &inviter),
                    invitee_id: couple.partner_of(inviter_id),
                });
            }
            InsertOutcome::CoupleBusy => {
                warn!(couple_id = %couple.id, "concurrent invitation detected; re-checking");
                if let Some(winner) = live_session_for_couple(&store, couple.id, now).await? {
                    return Err(ServiceError::ActiveSessionExists(winner.id));
                }
            }
        }
    }

    Err(ServiceError::InvalidState(
        "Could not create the invitation, please retry".into(),
    ))
}

/// Accept a pending invitation: draw the questions and start Round 1.
pub async fn accept_invitation(
    state: &SharedState,
    session_id: Uuid,
    accepter_id: Uuid,
) -> Result<StartedGame, ServiceError> {
    info!(%session_id, %accepter_id, "accepting invitation");
    let store = state.require_session_store().await?;

    for _ in 0..MAX_WRITE_ATTEMPTS {
        let now = SystemTime::now();
        let session = load_live_session(&store, session_id, now).await?;

        if session.status != SessionStatus::Invited {
            return Err(ServiceError::InvalidState(format!(
                "Game is not in INVITED state: {}",
                session.status.as_str()
            )));
        }
        if !session.has_participant(accepter_id) {
            return Err(ServiceError::InvalidState(
                "Accepter is not part of this couple".into(),
            ));
        }

        let mut pool = state
            .question_bank()
            .questions_for_category(session.category_id)
            .await?;
        ensure_pool_size(pool.len())?;
        pool.shuffle(&mut rng());
        pool.truncate(QUESTIONS_PER_GAME);

        let order: Vec<i64> = pool.iter().map(|question| question.id).collect();
        let Some(started) = try_transition(&store, &session, SessionEvent::Accept, now, |next| {
            next.question_order = order;
            next.current_question_index = 0;
            next.started_at = Some(now);
        })
        .await?
        else {
            warn!(%session_id, "session changed while accepting; retrying");
            continue;
        };

        info!(%session_id, questions = ?started.question_order, "game started");
        let first = pool.swap_remove(0);
        let first_question =
            QuestionPayload::new(session_id, first, 0, started.question_order.len(), Round::Round1);
        return Ok(StartedGame {
            session: started,
            first_question,
        });
    }

    Err(busy(session_id))
}

/// Decline a pending invitation.
pub async fn decline_invitation(
    state: &SharedState,
    session_id: Uuid,
    decliner_id: Uuid,
) -> Result<GameSessionEntity, ServiceError> {
    info!(%session_id, %decliner_id, "declining invitation");
    let store = state.require_session_store().await?;

    for _ in 0..MAX_WRITE_ATTEMPTS {
        let now = SystemTime::now();
        let session = load_live_session(&store, session_id, now).await?;

        if !session.has_participant(decliner_id) {
            return Err(ServiceError::InvalidState(
                "Decliner is not part of this couple".into(),
            ));
        }
        if session.status != SessionStatus::Invited {
            return Err(ServiceError::InvalidState(format!(
                "Game is not in INVITED state: {}",
                session.status.as_str()
            )));
        }

        if let Some(declined) =
            try_transition(&store, &session, SessionEvent::Decline, now, |next| {
                next.completed_at = Some(now);
            })
            .await?
        {
            info!(%session_id, "invitation declined");
            return Ok(declined);
        }
    }

    Err(busy(session_id))
}

/// Load a session on behalf of one of its participants.
pub async fn get_game_session(
    state: &SharedState,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<GameSessionEntity, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, session_id).await?;
    ensure_participant(&session, user_id)?;
    Ok(session)
}

/// Record a Round 1 answer and advance the session once both players answered.
pub async fn submit_answer(
    state: &SharedState,
    session_id: Uuid,
    user_id: Uuid,
    question_id: i64,
    answer: &str,
) -> Result<AnswerOutcome, ServiceError> {
    let choice = Choice::parse(answer).ok_or_else(|| {
        ServiceError::InvalidInput(format!("Answer must be A, B, C, or D. Received: {answer}"))
    })?;
    info!(%session_id, %user_id, question_id, answer = choice.as_str(), "submitting answer");

    let store = state.require_session_store().await?;
    let session = load_live_session(&store, session_id, SystemTime::now()).await?;
    ensure_participant(&session, user_id)?;

    if store
        .find_answer(session_id, question_id, user_id)
        .await?
        .is_some()
    {
        if let Some(position) = pending_round1_advance(state, &session, question_id).await? {
            warn!(%session_id, question_id, "both answers recorded but session not advanced; retrying advance");
            return advance_round1(state, &store, session_id, position).await;
        }
        warn!(%session_id, %user_id, question_id, "answer already recorded; ignoring duplicate");
        return Ok(AnswerOutcome::Duplicate);
    }

    if session.status != SessionStatus::Round1 {
        return Err(ServiceError::InvalidState(format!(
            "Game is not in ROUND1 state: {}",
            session.status.as_str()
        )));
    }
    let position = current_position(&session, question_id)?;

    let inserted = store
        .insert_answer(AnswerEntity {
            session_id,
            question_id,
            user_id,
            round1_answer: choice,
            round2_guess: None,
        })
        .await?;
    if !inserted {
        warn!(%session_id, %user_id, question_id, "concurrent duplicate answer ignored");
        return Ok(AnswerOutcome::Duplicate);
    }
    info!(%session_id, %user_id, question_id, "answer recorded");

    if !are_both_players_answered(state, session_id, question_id).await? {
        debug!(%session_id, question_id, "waiting for partner to answer");
        touch(&store, &session, SystemTime::now()).await;
        return Ok(AnswerOutcome::Waiting);
    }

    info!(%session_id, question_id, "both players answered; advancing");
    advance_round1(state, &store, session_id, position).await
}

/// Whether both players recorded a Round 1 answer for the question.
pub async fn are_both_players_answered(
    state: &SharedState,
    session_id: Uuid,
    question_id: i64,
) -> Result<bool, ServiceError> {
    let store = state.require_session_store().await?;
    Ok(store.count_answers(session_id, question_id).await? >= 2)
}

/// Position of `question_id` when both players answered it but the session still points at it,
/// which happens when the advancing write failed after the second answer was stored.
async fn pending_round1_advance(
    state: &SharedState,
    session: &GameSessionEntity,
    question_id: i64,
) -> Result<Option<usize>, ServiceError> {
    if session.status != SessionStatus::Round1
        || session.position_of(question_id) != Some(session.current_question_index)
    {
        return Ok(None);
    }
    if !are_both_players_answered(state, session.id, question_id).await? {
        return Ok(None);
    }
    Ok(Some(session.current_question_index))
}

async fn advance_round1(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
    position: usize,
) -> Result<AnswerOutcome, ServiceError> {
    for _ in 0..MAX_WRITE_ATTEMPTS {
        let now = SystemTime::now();
        let session = load_session(store, session_id).await?;
        let total = session.question_order.len();

        if session.status != SessionStatus::Round1 || session.current_question_index != position {
            debug!(%session_id, position, "advance already performed by partner");
            let next = if position + 1 < total {
                Some(question_at(state, &session, position + 1, Round::Round1).await?)
            } else {
                None
            };
            return Ok(AnswerOutcome::Stale(next));
        }

        let finished = position + 1 >= total;
        let (event, next_index) = if finished {
            (SessionEvent::FinishRound1, 0)
        } else {
            (SessionEvent::NextQuestion, position + 1)
        };

        let Some(updated) = try_transition(store, &session, event, now, |next| {
            next.current_question_index = next_index;
        })
        .await?
        else {
            warn!(%session_id, position, "lost advance race; re-reading session");
            continue;
        };

        if finished {
            info!(%session_id, "round 1 complete");
            return Ok(AnswerOutcome::Round1Complete);
        }

        info!(%session_id, question = next_index + 1, total, "advancing to next question");
        let question = question_at(state, &updated, next_index, Round::Round1).await?;
        return Ok(AnswerOutcome::Advanced(question));
    }

    Err(busy(session_id))
}

/// First question of Round 2, re-asserting the cursor at index 0.
pub async fn get_first_round2_question(
    state: &SharedState,
    session_id: Uuid,
) -> Result<QuestionPayload, ServiceError> {
    let store = state.require_session_store().await?;
    let now = SystemTime::now();
    let session = load_live_session(&store, session_id, now).await?;

    if session.status != SessionStatus::Round2 {
        return Err(ServiceError::InvalidState(format!(
            "Game is not in ROUND2 state: {}",
            session.status.as_str()
        )));
    }

    info!(%session_id, "starting round 2");
    let session = if session.current_question_index != 0 {
        let mut reset = session.clone();
        reset.current_question_index = 0;
        reset.last_activity_at = now;
        if store.replace_session(reset.clone(), session.version).await? {
            reset
        } else {
            load_session(&store, session_id).await?
        }
    } else {
        session
    };

    question_at(state, &session, 0, Round::Round2).await
}

/// Record a Round 2 guess and report whether it matched the partner's answer.
///
/// Replaying a guess returns the stored result without overwriting it.
pub async fn submit_guess(
    state: &SharedState,
    session_id: Uuid,
    user_id: Uuid,
    question_id: i64,
    guess: &str,
) -> Result<GuessResultPayload, ServiceError> {
    let choice = Choice::parse(guess).ok_or_else(|| {
        ServiceError::InvalidInput(format!("Guess must be A, B, C, or D. Received: {guess}"))
    })?;
    info!(%session_id, %user_id, question_id, guess = choice.as_str(), "submitting guess");

    let store = state.require_session_store().await?;
    let now = SystemTime::now();
    let session = load_live_session(&store, session_id, now).await?;
    ensure_participant(&session, user_id)?;

    if session.status != SessionStatus::Round2 {
        return Err(ServiceError::InvalidState(format!(
            "Game is not in ROUND2 state: {}",
            session.status.as_str()
        )));
    }
    let position = session.position_of(question_id).ok_or_else(|| {
        ServiceError::InvalidState(format!(
            "Question {question_id} is not part of this game session"
        ))
    })?;

    let own = store
        .find_answer(session_id, question_id, user_id)
        .await?
        .ok_or_else(|| {
            ServiceError::InvalidState("No Round 1 answer found for this user and question".into())
        })?;

    let your_guess = match own.round2_guess {
        Some(existing) => {
            warn!(%session_id, %user_id, question_id, "guess already recorded; ignoring duplicate");
            existing
        }
        None => {
            if position != session.current_question_index {
                return Err(ServiceError::InvalidState(format!(
                    "Question {question_id} is not the current question"
                )));
            }
            if store
                .record_guess(session_id, question_id, user_id, choice)
                .await?
            {
                info!(%session_id, %user_id, question_id, "guess recorded");
                touch(&store, &session, now).await;
                choice
            } else {
                store
                    .find_answer(session_id, question_id, user_id)
                    .await?
                    .and_then(|answer| answer.round2_guess)
                    .unwrap_or(choice)
            }
        }
    };

    let partner_id = session
        .partner_of(user_id)
        .ok_or_else(|| ServiceError::InvalidState("User is not part of this game session".into()))?;
    let partner = store
        .find_answer(session_id, question_id, partner_id)
        .await?
        .ok_or_else(|| ServiceError::InvalidState("Partner's Round 1 answer not found".into()))?;

    let answers = store.list_answers(session_id).await?;
    let correct_count = correct_guesses(&answers, user_id, partner_id);
    let question = find_question(state, question_id).await?;

    Ok(GuessResultPayload {
        session_id,
        question_id,
        question_number: position + 1,
        question_text: question.text,
        your_guess,
        partner_answer: partner.round1_answer,
        correct: your_guess == partner.round1_answer,
        correct_count,
    })
}

/// Whether both players guessed the question.
pub async fn are_both_players_guessed(
    state: &SharedState,
    session_id: Uuid,
    question_id: i64,
) -> Result<bool, ServiceError> {
    let store = state.require_session_store().await?;
    Ok(store.count_guesses(session_id, question_id).await? >= 2)
}

/// Move Round 2 past `question_id` once it has been guessed by both players.
pub async fn get_next_round2_question(
    state: &SharedState,
    session_id: Uuid,
    question_id: i64,
) -> Result<Round2Advance, ServiceError> {
    let store = state.require_session_store().await?;

    for _ in 0..MAX_WRITE_ATTEMPTS {
        let now = SystemTime::now();
        let session = load_live_session(&store, session_id, now).await?;

        if session.status == SessionStatus::Completed {
            return Ok(Round2Advance::Stale);
        }
        if session.status != SessionStatus::Round2 {
            return Err(ServiceError::InvalidState(format!(
                "Game is not in ROUND2 state: {}",
                session.status.as_str()
            )));
        }
        let Some(position) = session.position_of(question_id) else {
            return Err(ServiceError::InvalidState(format!(
                "Question {question_id} is not part of this game session"
            )));
        };
        if session.current_question_index != position {
            return Ok(Round2Advance::Stale);
        }

        let total = session.question_order.len();
        if position + 1 >= total {
            info!(%session_id, "round 2 complete");
            return Ok(Round2Advance::Finished);
        }

        let next_index = position + 1;
        let Some(updated) = try_transition(&store, &session, SessionEvent::NextQuestion, now, |next| {
            next.current_question_index = next_index;
        })
        .await?
        else {
            warn!(%session_id, position, "lost round 2 advance race; re-reading session");
            continue;
        };

        info!(%session_id, question = next_index + 1, total, "round 2: advancing to next question");
        let question = question_at(state, &updated, next_index, Round::Round2).await?;
        return Ok(Round2Advance::Next(question));
    }

    Err(busy(session_id))
}

/// Score both players and complete the session. Completed sessions return their stored scores.
pub async fn calculate_and_complete_game(
    state: &SharedState,
    session_id: Uuid,
) -> Result<CompletedGame, ServiceError> {
    info!(%session_id, "calculating final scores");
    let store = state.require_session_store().await?;

    for _ in 0..MAX_WRITE_ATTEMPTS {
        let now = SystemTime::now();
        let session = load_live_session(&store, session_id, now).await?;
        let player1_name = display_name(state, session.player1_id).await?;
        let player2_name = display_name(state, session.player2_id).await?;

        if session.status == SessionStatus::Completed {
            let results = GameResultsPayload::new(
                session_id,
                (player1_name, session.player1_score.unwrap_or(0)),
                (player2_name, session.player2_score.unwrap_or(0)),
            );
            return Ok(CompletedGame {
                results,
                newly_completed: false,
            });
        }
        if session.status != SessionStatus::Round2 {
            return Err(ServiceError::InvalidState(format!(
                "Game is not in ROUND2 state: {}",
                session.status.as_str()
            )));
        }

        let answers = store.list_answers(session_id).await?;
        let (player1_score, player2_score) =
            score_answers(&answers, session.player1_id, session.player2_id);

        if try_transition(&store, &session, SessionEvent::FinishRound2, now, |next| {
            next.player1_score = Some(player1_score);
            next.player2_score = Some(player2_score);
            next.completed_at = Some(now);
        })
        .await?
        .is_none()
        {
            warn!(%session_id, "session changed while completing; re-reading");
            continue;
        }

        info!(%session_id, player1_score, player2_score, "game completed");
        let results = GameResultsPayload::new(
            session_id,
            (player1_name, player1_score),
            (player2_name, player2_score),
        );
        return Ok(CompletedGame {
            results,
            newly_completed: true,
        });
    }

    Err(busy(session_id))
}

/// Question the player should see right now, `None` outside of both rounds.
pub async fn get_current_question(
    state: &SharedState,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<Option<QuestionPayload>, ServiceError> {
    let store = state.require_session_store().await?;
    let now = SystemTime::now();
    let session = load_live_session(&store, session_id, now).await?;
    ensure_participant(&session, user_id)?;

    let round = match session.status {
        SessionStatus::Round1 => Round::Round1,
        SessionStatus::Round2 => Round::Round2,
        _ => return Ok(None),
    };
    if session.question_order.is_empty() {
        return Ok(None);
    }

    let index = session.safe_question_index();
    let question = question_at(state, &session, index, round).await?;
    touch(&store, &session, now).await;
    Ok(Some(question))
}

/// Most recent running session of the user's couple, expiring stale ones on the way.
pub async fn get_latest_active_session_for_user(
    state: &SharedState,
    user_id: Uuid,
) -> Result<Option<GameSessionEntity>, ServiceError> {
    let Some(couple) = state.directory().find_couple_for_user(user_id).await? else {
        return Ok(None);
    };
    let store = state.require_session_store().await?;
    live_session_for_couple(&store, couple.id, SystemTime::now()).await
}

/// Expire every running session whose deadline passed; returns how many were expired.
pub async fn expire_stale_sessions(
    state: &SharedState,
    now: SystemTime,
) -> Result<usize, ServiceError> {
    let store = state.require_session_store().await?;
    let mut expired = 0;
    for session in store.find_expirable(now).await? {
        if let Freshness::Expired(_) = refresh_expiry(&store, session, now).await? {
            expired += 1;
        }
    }
    Ok(expired)
}

/// Per-player count of correct guesses over questions both players answered.
pub fn score_answers(answers: &[AnswerEntity], player1_id: Uuid, player2_id: Uuid) -> (u32, u32) {
    let mut by_question: IndexMap<i64, (Option<&AnswerEntity>, Option<&AnswerEntity>)> =
        IndexMap::new();
    for answer in answers {
        let slot = by_question.entry(answer.question_id).or_default();
        if answer.user_id == player1_id {
            slot.0 = Some(answer);
        } else if answer.user_id == player2_id {
            slot.1 = Some(answer);
        }
    }

    by_question
        .values()
        .filter_map(|(p1, p2)| (*p1).zip(*p2))
        .fold((0, 0), |(p1_score, p2_score), (p1, p2)| {
            (
                p1_score + u32::from(p1.round2_guess == Some(p2.round1_answer)),
                p2_score + u32::from(p2.round2_guess == Some(p1.round1_answer)),
            )
        })
}

fn correct_guesses(answers: &[AnswerEntity], user_id: Uuid, partner_id: Uuid) -> u32 {
    let partner_answers: HashMap<i64, Choice> = answers
        .iter()
        .filter(|answer| answer.user_id == partner_id)
        .map(|answer| (answer.question_id, answer.round1_answer))
        .collect();

    answers
        .iter()
        .filter(|answer| answer.user_id == user_id)
        .filter(|answer| {
            answer
                .round2_guess
                .is_some_and(|guess| partner_answers.get(&answer.question_id) == Some(&guess))
        })
        .count() as u32
}

/// Result of the lazy expiry check.
enum Freshness {
    Live(GameSessionEntity),
    Expired(GameSessionEntity),
}

/// Expire `session` if its deadline passed while it was still running.
async fn refresh_expiry(
    store: &Arc<dyn SessionStore>,
    mut session: GameSessionEntity,
    now: SystemTime,
) -> Result<Freshness, ServiceError> {
    for _ in 0..MAX_WRITE_ATTEMPTS {
        if session.status.is_terminal() || session.expires_at > now {
            return Ok(Freshness::Live(session));
        }

        if let Some(expired) = try_transition(store, &session, SessionEvent::Expire, now, |next| {
            next.completed_at.get_or_insert(now);
        })
        .await?
        {
            info!(session_id = %expired.id, "session auto-expired");
            return Ok(Freshness::Expired(expired));
        }
        session = load_session(store, session.id).await?;
    }

    Err(busy(session.id))
}

/// Load a session and fail with [`ServiceError::SessionExpired`] when it is (or just became) expired.
async fn load_live_session(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
    now: SystemTime,
) -> Result<GameSessionEntity, ServiceError> {
    let session = load_session(store, session_id).await?;
    match refresh_expiry(store, session, now).await? {
        Freshness::Expired(_) => Err(ServiceError::SessionExpired(session_id)),
        Freshness::Live(session) if session.status == SessionStatus::Expired => {
            Err(ServiceError::SessionExpired(session_id))
        }
        Freshness::Live(session) => Ok(session),
    }
}

async fn load_session(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
) -> Result<GameSessionEntity, ServiceError> {
    store
        .find_session(session_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Game session not found: {session_id}")))
}

async fn live_session_for_couple(
    store: &Arc<dyn SessionStore>,
    couple_id: Uuid,
    now: SystemTime,
) -> Result<Option<GameSessionEntity>, ServiceError> {
    let mut latest: Option<GameSessionEntity> = None;
    for candidate in store.find_active_sessions(couple_id).await? {
        if let Freshness::Live(session) = refresh_expiry(store, candidate, now).await? {
            if session.status.is_terminal() {
                continue;
            }
            if latest
                .as_ref()
                .is_none_or(|current| session.created_at > current.created_at)
            {
                latest = Some(session);
            }
        }
    }
    Ok(latest)
}

/// Validate `event` against the session, apply `edit` and commit with a version check.
///
/// Returns `None` when another writer updated the session first.
async fn try_transition<F>(
    store: &Arc<dyn SessionStore>,
    session: &GameSessionEntity,
    event: SessionEvent,
    now: SystemTime,
    edit: F,
) -> Result<Option<GameSessionEntity>, ServiceError>
where
    F: FnOnce(&mut GameSessionEntity),
{
    let plan = state_machine::plan(session, event)?;
    let mut next = session.clone();
    plan.apply(&mut next)?;
    edit(&mut next);
    next.last_activity_at = now;

    if store
        .replace_session(next.clone(), plan.expected_version())
        .await?
    {
        Ok(Some(next))
    } else {
        Ok(None)
    }
}

/// Best-effort update of `last_activity_at`.
async fn touch(store: &Arc<dyn SessionStore>, session: &GameSessionEntity, now: SystemTime) {
    let mut touched = session.clone();
    touched.last_activity_at = now;
    match store.replace_session(touched, session.version).await {
        Ok(true) => {}
        Ok(false) => debug!(session_id = %session.id, "activity touch skipped; session changed"),
        Err(err) => warn!(session_id = %session.id, error = %err, "failed to touch session activity"),
    }
}

async fn question_at(
    state: &SharedState,
    session: &GameSessionEntity,
    index: usize,
    round: Round,
) -> Result<QuestionPayload, ServiceError> {
    let question_id = *session.question_order.get(index).ok_or_else(|| {
        ServiceError::InvalidState(format!("No question at position {} of this game", index + 1))
    })?;
    let question = find_question(state, question_id).await?;
    Ok(QuestionPayload::new(
        session.id,
        question,
        index,
        session.question_order.len(),
        round,
    ))
}

async fn find_question(state: &SharedState, question_id: i64) -> Result<QuestionEntity, ServiceError> {
    state
        .question_bank()
        .find_question(question_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Question not found: {question_id}")))
}

async fn display_name(state: &SharedState, user_id: Uuid) -> Result<String, ServiceError> {
    state
        .directory()
        .find_user(user_id)
        .await?
        .map(|user| user.name)
        .ok_or_else(|| ServiceError::NotFound(format!("User not found: {user_id}")))
}

fn ensure_participant(session: &GameSessionEntity, user_id: Uuid) -> Result<(), ServiceError> {
    if session.has_participant(user_id) {
        Ok(())
    } else {
        Err(ServiceError::InvalidState(
            "User is not part of this game session".into(),
        ))
    }
}

fn ensure_pool_size(available: usize) -> Result<(), ServiceError> {
    if available < QUESTIONS_PER_GAME {
        return Err(ServiceError::InvalidState(format!(
            "Not enough questions in category. Required: {QUESTIONS_PER_GAME}, Available: {available}"
        )));
    }
    Ok(())
}

/// Position of `question_id`, which must be the question the session currently waits on.
fn current_position(session: &GameSessionEntity, question_id: i64) -> Result<usize, ServiceError> {
    let position = session.position_of(question_id).ok_or_else(|| {
        ServiceError::InvalidState(format!(
            "Question {question_id} is not part of this game session"
        ))
    })?;
    if position != session.current_question_index {
        return Err(ServiceError::InvalidState(format!(
            "Question {question_id} is not the current question"
        )));
    }
    Ok(position)
}

fn busy(session_id: Uuid) -> ServiceError {
    ServiceError::InvalidState(format!(
        "Game session {session_id} is busy, please retry"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(question_id: i64, user_id: Uuid, round1: Choice, guess: Option<Choice>) -> AnswerEntity {
        AnswerEntity {
            session_id: Uuid::nil(),
            question_id,
            user_id,
            round1_answer: round1,
            round2_guess: guess,
        }
    }

    #[test]
    fn scoring_counts_guesses_matching_partner_answers() {
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let answers = vec![
            answer(1, p1, Choice::A, Some(Choice::B)),
            answer(1, p2, Choice::B, Some(Choice::A)),
            answer(2, p1, Choice::C, Some(Choice::D)),
            answer(2, p2, Choice::A, Some(Choice::C)),
            // partner never answered question 3
            answer(3, p1, Choice::A, Some(Choice::A)),
        ];

        assert_eq!(score_answers(&answers, p1, p2), (1, 2));
    }

    #[test]
    fn missing_guesses_score_nothing() {
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let answers = vec![answer(1, p1, Choice::A, None), answer(1, p2, Choice::A, None)];
        assert_eq!(score_answers(&answers, p1, p2), (0, 0));
    }

    #[test]
    fn running_count_joins_guesses_against_partner() {
        let (me, partner) = (Uuid::new_v4(), Uuid::new_v4());
        let answers = vec![
            answer(1, me, Choice::A, Some(Choice::B)),
            answer(1, partner, Choice::B, None),
            answer(2, me, Choice::A, Some(Choice::B)),
            answer(2, partner, Choice::C, None),
            answer(3, me, Choice::A, None),
            answer(3, partner, Choice::D, None),
        ];
        assert_eq!(correct_guesses(&answers, me, partner), 1);
    }

    #[test]
    fn pool_must_cover_a_full_game() {
        assert!(ensure_pool_size(8).is_ok());
        let err = ensure_pool_size(1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid state: Not enough questions in category. Required: 8, Available: 1"
        );
    }
}
