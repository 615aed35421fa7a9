//! Turns inbound player actions into engine calls and fans the results out to private queues,
//! session topics and push notifications.

use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        game::{ErrorPayload, StatusKind, StatusPayload},
        ws::{
            AnswerRequest, Destination, GuessRequest, InboundMessage, InviteRequest, OutboundEvent,
            OutboundFrame, SessionRequest,
        },
    },
    error::ServiceError,
    services::{
        game_service::{self, AnswerOutcome, Round2Advance},
        notification::{PushMessage, notify_in_background},
    },
    state::SharedState,
};

/// Presence change of a player, reported to their partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// First connection of the player opened.
    Returned,
    /// Last connection of the player closed.
    Left,
}

/// Route a game action sent by `user_id`.
///
/// Identification, subscription and unknown frames are connection concerns and are ignored here.
pub async fn route(state: &SharedState, user_id: Uuid, message: InboundMessage) {
    match message {
        InboundMessage::Invite(request) => handle_invite(state, user_id, request).await,
        InboundMessage::Accept(request) => handle_accept(state, user_id, request).await,
        InboundMessage::Decline(request) => handle_decline(state, user_id, request).await,
        InboundMessage::Answer(request) => handle_answer(state, user_id, request).await,
        InboundMessage::Guess(request) => handle_guess(state, user_id, request).await,
        InboundMessage::Identification { .. }
        | InboundMessage::Subscribe(_)
        | InboundMessage::Unsubscribe(_)
        | InboundMessage::Unknown => {}
    }
}

/// Send an error frame to every connection of `user_id`.
pub fn send_error(state: &SharedState, user_id: Uuid, message: impl Into<String>) {
    send_private(
        state,
        user_id,
        Destination::Errors,
        OutboundEvent::Error(ErrorPayload::new(message.into())),
    );
}

/// Tell the partner of `user_id` that they joined or left, if the couple has a running session.
pub async fn announce_presence(state: &SharedState, user_id: Uuid, presence: Presence) {
    let session = match game_service::get_latest_active_session_for_user(state, user_id).await {
        Ok(Some(session)) => session,
        Ok(None) => return,
        Err(err) => {
            warn!(%user_id, error = %err, "presence lookup failed");
            return;
        }
    };
    let Some(partner_id) = session.partner_of(user_id) else {
        return;
    };
    let name = match state.directory().find_user(user_id).await {
        Ok(Some(user)) => user.name,
        Ok(None) => return,
        Err(err) => {
            warn!(%user_id, error = %err, "presence lookup failed");
            return;
        }
    };

    let (kind, message) = match presence {
        Presence::Returned => (
            StatusKind::PartnerReturned,
            format!("{name} returned to the game."),
        ),
        Presence::Left => (
            StatusKind::PartnerLeft,
            format!("{name} left the game. You can continue when they return."),
        ),
    };
    send_private(
        state,
        partner_id,
        Destination::GameEvents,
        OutboundEvent::Status(StatusPayload::new(session.id, kind, message).stamped()),
    );
    info!(session_id = %session.id, %partner_id, status = ?kind, "presence event emitted");
}

async fn handle_invite(state: &SharedState, user_id: Uuid, request: InviteRequest) {
    if let Err(err) = invite(state, user_id, request).await {
        report(state, user_id, "Failed to send invitation: ", err);
    }
}

async fn invite(
    state: &SharedState,
    user_id: Uuid,
    request: InviteRequest,
) -> Result<(), ServiceError> {
    let invitation = game_service::create_invitation(state, user_id, request.category_id).await?;
    let session_id = invitation.payload.session_id;
    let partner_name = user_name(state, invitation.invitee_id).await?;

    send_private(
        state,
        user_id,
        Destination::GameEvents,
        OutboundEvent::Status(StatusPayload::new(
            session_id,
            StatusKind::InvitationSent,
            format!("Invitation sent to {partner_name}"),
        )),
    );

    let push = PushMessage::new(
        "Game Invitation",
        format!("{} wants to play with you!", invitation.payload.inviter_name),
    )
    .with_data(json!({ "type": "INVITATION", "sessionId": session_id }));

    send_private(
        state,
        invitation.invitee_id,
        Destination::GameEvents,
        OutboundEvent::Invitation(invitation.payload),
    );
    notify_in_background(state, invitation.invitee_id, push);

    info!(%session_id, inviter = %user_id, invitee = %invitation.invitee_id, "invitation delivered");
    Ok(())
}

async fn handle_accept(state: &SharedState, user_id: Uuid, request: SessionRequest) {
    if let Err(err) = accept(state, user_id, request).await {
        report(state, user_id, "Failed to accept game: ", err);
    }
}

async fn accept(
    state: &SharedState,
    user_id: Uuid,
    request: SessionRequest,
) -> Result<(), ServiceError> {
    let started = game_service::accept_invitation(state, request.session_id, user_id).await?;
    let session_id = started.session.id;
    let Some(inviter_id) = started.session.partner_of(user_id) else {
        return Err(ServiceError::InvalidState(
            "Accepter is not part of this couple".into(),
        ));
    };
    let accepter_name = user_name(state, user_id).await?;

    send_private(
        state,
        inviter_id,
        Destination::GameEvents,
        OutboundEvent::Status(StatusPayload::new(
            session_id,
            StatusKind::InvitationAccepted,
            format!("{accepter_name} accepted your invitation"),
        )),
    );

    // Private copies cover clients that have not subscribed to the topic yet.
    let question = OutboundEvent::Question(started.first_question);
    send_private(state, inviter_id, Destination::GameEvents, question.clone());
    send_private(state, user_id, Destination::GameEvents, question.clone());
    publish(state, session_id, question);

    info!(%session_id, accepter = %user_id, "game started; first question sent");
    Ok(())
}

async fn handle_decline(state: &SharedState, user_id: Uuid, request: SessionRequest) {
    if let Err(err) = decline(state, user_id, request).await {
        report(state, user_id, "Failed to decline: ", err);
    }
}

async fn decline(
    state: &SharedState,
    user_id: Uuid,
    request: SessionRequest,
) -> Result<(), ServiceError> {
    let session = game_service::decline_invitation(state, request.session_id, user_id).await?;
    let Some(partner_id) = session.partner_of(user_id) else {
        return Err(ServiceError::InvalidState(
            "Decliner is not part of this couple".into(),
        ));
    };
    let decliner_name = user_name(state, user_id).await?;

    send_private(
        state,
        partner_id,
        Destination::GameEvents,
        OutboundEvent::Status(StatusPayload::new(
            session.id,
            StatusKind::InvitationDeclined,
            format!("{decliner_name} declined the invitation"),
        )),
    );
    notify_in_background(
        state,
        partner_id,
        PushMessage::new(
            "Invitation Declined",
            format!("{decliner_name} declined the game invitation"),
        ),
    );
    state.channels().close_topic(session.id);

    info!(session_id = %session.id, decliner = %user_id, "invitation declined");
    Ok(())
}

async fn handle_answer(state: &SharedState, user_id: Uuid, request: AnswerRequest) {
    if let Err(err) = answer(state, user_id, request).await {
        report(state, user_id, "Failed to submit answer: ", err);
    }
}

async fn answer(
    state: &SharedState,
    user_id: Uuid,
    request: AnswerRequest,
) -> Result<(), ServiceError> {
    let session_id = request.session_id;
    let outcome = game_service::submit_answer(
        state,
        session_id,
        user_id,
        request.question_id,
        &request.answer,
    )
    .await?;

    send_private(
        state,
        user_id,
        Destination::GameStatus,
        OutboundEvent::Status(StatusPayload::new(
            session_id,
            StatusKind::AnswerRecorded,
            "Waiting for partner...",
        )),
    );

    match outcome {
        AnswerOutcome::Advanced(question) => {
            info!(%session_id, question = question.question_number, "round 1: next question sent");
            publish(state, session_id, OutboundEvent::Question(question));
        }
        AnswerOutcome::Round1Complete => {
            publish(
                state,
                session_id,
                OutboundEvent::Status(StatusPayload::new(
                    session_id,
                    StatusKind::Round1Complete,
                    "Round 1 complete! Now guess your partner's answers...",
                )),
            );
            let first = game_service::get_first_round2_question(state, session_id).await?;
            publish(state, session_id, OutboundEvent::Question(first));
            info!(%session_id, "round 2 started");
        }
        AnswerOutcome::Duplicate | AnswerOutcome::Waiting | AnswerOutcome::Stale(_) => {}
    }
    Ok(())
}

async fn handle_guess(state: &SharedState, user_id: Uuid, request: GuessRequest) {
    if let Err(err) = guess(state, user_id, request).await {
        report(state, user_id, "Failed to submit guess: ", err);
    }
}

async fn guess(
    state: &SharedState,
    user_id: Uuid,
    request: GuessRequest,
) -> Result<(), ServiceError> {
    let session_id = request.session_id;
    let result = game_service::submit_guess(
        state,
        session_id,
        user_id,
        request.question_id,
        &request.guess,
    )
    .await?;
    send_private(
        state,
        user_id,
        Destination::GameEvents,
        OutboundEvent::GuessResult(result),
    );

    if !game_service::are_both_players_guessed(state, session_id, request.question_id).await? {
        return Ok(());
    }

    match game_service::get_next_round2_question(state, session_id, request.question_id).await? {
        Round2Advance::Next(question) => {
            info!(%session_id, question = question.question_number, "round 2: next question sent");
            publish(state, session_id, OutboundEvent::Question(question));
        }
        Round2Advance::Finished => {
            let completed = game_service::calculate_and_complete_game(state, session_id).await?;
            if completed.newly_completed {
                info!(
                    %session_id,
                    player1_score = completed.results.player1_score,
                    player2_score = completed.results.player2_score,
                    "game results sent"
                );
                publish(
                    state,
                    session_id,
                    OutboundEvent::GameResults(completed.results),
                );
                state.channels().close_topic(session_id);
            }
        }
        Round2Advance::Stale => {}
    }
    Ok(())
}

fn report(state: &SharedState, user_id: Uuid, prefix: &str, err: ServiceError) {
    error!(%user_id, error = %err, "{}", prefix.trim_end_matches([':', ' ']));
    send_error(state, user_id, format!("{prefix}{}", err.client_message()));
}

fn send_private(state: &SharedState, user_id: Uuid, destination: Destination, event: OutboundEvent) {
    let delivered = state
        .channels()
        .send_private(user_id, &OutboundFrame::new(destination, event));
    if delivered == 0 {
        info!(%user_id, destination = %destination.address(), "player offline; frame dropped");
    }
}

fn publish(state: &SharedState, session_id: Uuid, event: OutboundEvent) {
    state.channels().publish(
        session_id,
        OutboundFrame::new(Destination::Topic(session_id), event),
    );
}

async fn user_name(state: &SharedState, user_id: Uuid) -> Result<String, ServiceError> {
    state
        .directory()
        .find_user(user_id)
        .await?
        .map(|user| user.name)
        .ok_or_else(|| ServiceError::NotFound(format!("User not found: {user_id}")))
}
