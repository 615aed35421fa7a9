mod common;

use std::time::{Duration, SystemTime};

use couple_quiz_back::{
    dao::{
        catalog::demo,
        models::{GameSessionEntity, QUESTIONS_PER_GAME},
        session_store::InsertOutcome,
    },
    dto::{
        game::Round,
        query::{GameOutcome, HistoryQuery},
    },
    error::ServiceError,
    services::{
        game_service::{self, AnswerOutcome, Round2Advance},
        query_service,
    },
    state::state_machine::SessionStatus,
};
use uuid::Uuid;

use common::{
    completed_session, failing_state, play_round1, play_round2, session, start_game, store,
    test_state,
};

const ALL_A: [&str; 8] = ["A"; 8];
const ALL_B: [&str; 8] = ["B"; 8];

#[tokio::test]
async fn accepting_draws_eight_distinct_questions() {
    let state = test_state().await;
    let (session_id, order) = start_game(&state).await;

    assert_eq!(order.len(), QUESTIONS_PER_GAME);
    let mut unique = order.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), QUESTIONS_PER_GAME);
    assert!(order.iter().all(|id| (101..=110).contains(id)));

    let stored = session(&state, session_id).await;
    assert_eq!(stored.status, SessionStatus::Round1);
    assert_eq!(stored.current_question_index, 0);
    assert!(stored.started_at.is_some());
}

#[tokio::test]
async fn opposite_answers_guessed_perfectly_score_eight_each() {
    let state = test_state().await;
    let (session_id, order) = start_game(&state).await;

    play_round1(&state, session_id, &order, &ALL_A, &ALL_B).await;
    assert_eq!(session(&state, session_id).await.status, SessionStatus::Round2);

    play_round2(&state, session_id, &order, &ALL_B, &ALL_A).await;
    let completed = game_service::calculate_and_complete_game(&state, session_id)
        .await
        .unwrap();

    assert!(completed.newly_completed);
    let results = completed.results;
    assert_eq!((results.player1_score, results.player2_score), (8, 8));
    assert_eq!(results.player1_name, "Alex");
    assert_eq!(results.player2_name, "Sam");
    assert_eq!(results.total_questions, 8);
    assert_eq!(results.message, "Soulmates! You know each other perfectly!");

    let stored = session(&state, session_id).await;
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.player1_score, Some(8));
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn partial_guesses_give_a_good_start() {
    let state = test_state().await;
    let (session_id, order) = start_game(&state).await;

    play_round1(&state, session_id, &order, &ALL_A, &ALL_B).await;
    // Alex finds five of Sam's answers, Sam finds three of Alex's.
    let alex = ["B", "B", "B", "B", "B", "C", "C", "C"];
    let sam = ["A", "A", "A", "D", "D", "D", "D", "D"];
    play_round2(&state, session_id, &order, &alex, &sam).await;

    let results = game_service::calculate_and_complete_game(&state, session_id)
        .await
        .unwrap()
        .results;
    assert_eq!((results.player1_score, results.player2_score), (5, 3));
    assert_eq!(results.message, "Good start! Keep playing to learn more.");
}

#[tokio::test]
async fn completion_is_idempotent() {
    let state = test_state().await;
    let (session_id, order) = start_game(&state).await;
    play_round1(&state, session_id, &order, &ALL_A, &ALL_A).await;
    play_round2(&state, session_id, &order, &ALL_A, &ALL_B).await;

    let first = game_service::calculate_and_complete_game(&state, session_id)
        .await
        .unwrap();
    let second = game_service::calculate_and_complete_game(&state, session_id)
        .await
        .unwrap();

    assert!(first.newly_completed);
    assert!(!second.newly_completed);
    assert_eq!(first.results.player1_score, second.results.player1_score);
    assert_eq!((first.results.player1_score, first.results.player2_score), (8, 0));
    assert_eq!(first.results.message, "Good start! Keep playing to learn more.");
    assert_eq!(
        game_service::get_next_round2_question(&state, session_id, order[7])
            .await
            .unwrap(),
        Round2Advance::Stale
    );
}

#[tokio::test]
async fn repeated_answers_are_ignored() {
    let state = test_state().await;
    let (session_id, order) = start_game(&state).await;

    let first = game_service::submit_answer(&state, session_id, demo::ALEX, order[0], "A")
        .await
        .unwrap();
    let again = game_service::submit_answer(&state, session_id, demo::ALEX, order[0], "C")
        .await
        .unwrap();

    assert_eq!(first, AnswerOutcome::Waiting);
    assert_eq!(again, AnswerOutcome::Duplicate);
    let store = store(&state).await;
    assert_eq!(store.count_answers(session_id, order[0]).await.unwrap(), 1);
    let kept = store
        .find_answer(session_id, order[0], demo::ALEX)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kept.round1_answer.as_str(), "A");
    assert_eq!(session(&state, session_id).await.current_question_index, 0);
}

#[tokio::test]
async fn waiting_answers_refresh_session_activity() {
    let state = test_state().await;
    let (session_id, order) = start_game(&state).await;
    let before = session(&state, session_id).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let outcome = game_service::submit_answer(&state, session_id, demo::ALEX, order[0], "B")
        .await
        .unwrap();

    assert_eq!(outcome, AnswerOutcome::Waiting);
    let after = session(&state, session_id).await;
    assert!(after.last_activity_at > before.last_activity_at);
    assert_eq!(after.current_question_index, 0);
}

#[tokio::test]
async fn failed_advance_is_finished_by_a_retried_answer() {
    let (state, failing) = failing_state().await;
    let (session_id, order) = start_game(&state).await;

    assert_eq!(
        game_service::submit_answer(&state, session_id, demo::ALEX, order[0], "A")
            .await
            .unwrap(),
        AnswerOutcome::Waiting
    );

    failing.fail_next_replace();
    let err = game_service::submit_answer(&state, session_id, demo::SAM, order[0], "C")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unavailable(_)));
    assert_eq!(session(&state, session_id).await.current_question_index, 0);

    let retried = game_service::submit_answer(&state, session_id, demo::SAM, order[0], "C")
        .await
        .unwrap();
    match retried {
        AnswerOutcome::Advanced(question) => {
            assert_eq!(question.question_id, order[1]);
            assert_eq!(question.question_number, 2);
        }
        other => panic!("expected an advance, got {other:?}"),
    }
    assert_eq!(session(&state, session_id).await.current_question_index, 1);

    // The partner's replay finds the session already moved on.
    assert_eq!(
        game_service::submit_answer(&state, session_id, demo::ALEX, order[0], "A")
            .await
            .unwrap(),
        AnswerOutcome::Duplicate
    );
    assert_eq!(
        game_service::submit_answer(&state, session_id, demo::ALEX, order[1], "D")
            .await
            .unwrap(),
        AnswerOutcome::Waiting
    );
    assert_eq!(session(&state, session_id).await.current_question_index, 1);
}

#[tokio::test]
async fn simultaneous_answers_advance_exactly_once() {
    let state = test_state().await;
    let (session_id, order) = start_game(&state).await;

    for (index, question_id) in order.iter().take(3).enumerate() {
        let (alex, sam) = tokio::join!(
            game_service::submit_answer(&state, session_id, demo::ALEX, *question_id, "A"),
            game_service::submit_answer(&state, session_id, demo::SAM, *question_id, "B"),
        );
        let outcomes = [alex.unwrap(), sam.unwrap()];
        let advanced = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, AnswerOutcome::Advanced(_)))
            .count();
        assert_eq!(advanced, 1, "outcomes: {outcomes:?}");
        assert_eq!(
            session(&state, session_id).await.current_question_index,
            index + 1
        );
    }
}

#[tokio::test]
async fn spawned_answers_advance_exactly_once() {
    let state = test_state().await;
    let (session_id, order) = start_game(&state).await;
    let question_id = order[0];

    let handles: Vec<_> = [(demo::ALEX, "A"), (demo::SAM, "D")]
        .into_iter()
        .map(|(user, answer)| {
            let state = state.clone();
            tokio::spawn(async move {
                game_service::submit_answer(&state, session_id, user, question_id, answer).await
            })
        })
        .collect();

    let mut advanced = 0;
    for handle in handles {
        if let AnswerOutcome::Advanced(question) = handle.await.unwrap().unwrap() {
            assert_eq!(question.question_number, 2);
            advanced += 1;
        }
    }
    assert_eq!(advanced, 1);
    assert_eq!(session(&state, session_id).await.current_question_index, 1);
}

#[tokio::test]
async fn last_answer_opens_round_two_at_the_first_question() {
    let state = test_state().await;
    let (session_id, order) = start_game(&state).await;

    play_round1(&state, session_id, &order[..7], &ALL_A, &ALL_A).await;
    game_service::submit_answer(&state, session_id, demo::ALEX, order[7], "C")
        .await
        .unwrap();
    let outcome = game_service::submit_answer(&state, session_id, demo::SAM, order[7], "D")
        .await
        .unwrap();
    assert_eq!(outcome, AnswerOutcome::Round1Complete);

    let stored = session(&state, session_id).await;
    assert_eq!(stored.status, SessionStatus::Round2);
    assert_eq!(stored.current_question_index, 0);

    let first = game_service::get_first_round2_question(&state, session_id)
        .await
        .unwrap();
    assert_eq!(first.question_id, order[0]);
    assert_eq!(first.question_number, 1);
    assert_eq!(first.round, Round::Round2);

    let current = game_service::get_current_question(&state, session_id, demo::SAM)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current, first);
}

#[tokio::test]
async fn guess_results_report_partner_answer_and_running_count() {
    let state = test_state().await;
    let (session_id, order) = start_game(&state).await;
    play_round1(&state, session_id, &order, &ALL_A, &ALL_B).await;

    let hit = game_service::submit_guess(&state, session_id, demo::ALEX, order[0], "B")
        .await
        .unwrap();
    assert!(hit.correct);
    assert_eq!(hit.partner_answer.as_str(), "B");
    assert_eq!(hit.correct_count, 1);
    assert_eq!(hit.question_number, 1);

    // A replay keeps the stored guess.
    let replay = game_service::submit_guess(&state, session_id, demo::ALEX, order[0], "C")
        .await
        .unwrap();
    assert_eq!(replay.your_guess.as_str(), "B");
    assert!(replay.correct);
    assert!(
        !game_service::are_both_players_guessed(&state, session_id, order[0])
            .await
            .unwrap()
    );

    let miss = game_service::submit_guess(&state, session_id, demo::SAM, order[0], "D")
        .await
        .unwrap();
    assert!(!miss.correct);
    assert_eq!(miss.correct_count, 0);

    match game_service::get_next_round2_question(&state, session_id, order[0])
        .await
        .unwrap()
    {
        Round2Advance::Next(question) => {
            assert_eq!(question.question_id, order[1]);
            assert_eq!(question.round, Round::Round2);
        }
        other => panic!("unexpected advance: {other:?}"),
    }
    assert_eq!(
        game_service::get_next_round2_question(&state, session_id, order[0])
            .await
            .unwrap(),
        Round2Advance::Stale
    );
}

#[tokio::test]
async fn guessing_during_round_one_is_a_conflict() {
    let state = test_state().await;
    let (session_id, order) = start_game(&state).await;

    let err = game_service::submit_guess(&state, session_id, demo::ALEX, order[0], "A")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
    assert_eq!(err.client_message(), "Game is not in ROUND2 state: ROUND1");
}

#[tokio::test]
async fn answers_are_only_taken_for_the_current_question() {
    let state = test_state().await;
    let (session_id, order) = start_game(&state).await;

    let err = game_service::submit_answer(&state, session_id, demo::ALEX, order[3], "A")
        .await
        .unwrap_err();
    assert_eq!(
        err.client_message(),
        format!("Question {} is not the current question", order[3])
    );

    let err = game_service::submit_answer(&state, session_id, demo::ALEX, 201, "A")
        .await
        .unwrap_err();
    assert_eq!(
        err.client_message(),
        "Question 201 is not part of this game session"
    );

    let err = game_service::submit_answer(&state, session_id, demo::JORDAN, order[0], "A")
        .await
        .unwrap_err();
    assert_eq!(err.client_message(), "User is not part of this game session");

    let err = game_service::submit_answer(&state, session_id, demo::ALEX, order[0], "E")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn one_running_session_per_couple() {
    let state = test_state().await;
    let first = game_service::create_invitation(&state, demo::ALEX, demo::CATEGORY)
        .await
        .unwrap();
    assert_eq!(first.invitee_id, demo::SAM);
    assert_eq!(first.payload.inviter_name, "Alex");

    let err = game_service::create_invitation(&state, demo::SAM, demo::CATEGORY)
        .await
        .unwrap_err();
    match err {
        ServiceError::ActiveSessionExists(existing) => {
            assert_eq!(existing, first.payload.session_id)
        }
        other => panic!("unexpected error: {other:?}"),
    }

    game_service::decline_invitation(&state, first.payload.session_id, demo::SAM)
        .await
        .unwrap();
    let declined = session(&state, first.payload.session_id).await;
    assert_eq!(declined.status, SessionStatus::Declined);
    assert!(declined.completed_at.is_some());

    game_service::create_invitation(&state, demo::SAM, demo::CATEGORY)
        .await
        .unwrap();
}

#[tokio::test]
async fn invitation_preconditions() {
    let state = test_state().await;

    let err = game_service::create_invitation(&state, demo::JORDAN, demo::CATEGORY)
        .await
        .unwrap_err();
    assert_eq!(err.client_message(), "User must be in a couple to play");

    let err = game_service::create_invitation(&state, demo::ALEX, demo::SMALL_CATEGORY)
        .await
        .unwrap_err();
    assert_eq!(
        err.client_message(),
        "Not enough questions in category. Required: 8, Available: 1"
    );

    let err = game_service::create_invitation(&state, demo::ALEX, 99)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn accepting_twice_is_rejected() {
    let state = test_state().await;
    let (session_id, _) = start_game(&state).await;

    let err = game_service::accept_invitation(&state, session_id, demo::SAM)
        .await
        .unwrap_err();
    assert_eq!(err.client_message(), "Game is not in INVITED state: ROUND1");

    let err = game_service::decline_invitation(&state, session_id, demo::SAM)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

fn overdue_round1_session() -> GameSessionEntity {
    let now = SystemTime::now();
    GameSessionEntity {
        id: Uuid::new_v4(),
        couple_id: demo::COUPLE,
        player1_id: demo::ALEX,
        player2_id: demo::SAM,
        status: SessionStatus::Round1,
        category_id: demo::CATEGORY,
        question_order: (101..109).collect(),
        current_question_index: 0,
        player1_score: None,
        player2_score: None,
        created_at: now - Duration::from_secs(8 * 24 * 3600),
        started_at: Some(now - Duration::from_secs(8 * 24 * 3600)),
        completed_at: None,
        expires_at: now - Duration::from_secs(3600),
        last_activity_at: now - Duration::from_secs(7 * 24 * 3600),
        version: 1,
    }
}

#[tokio::test]
async fn overdue_sessions_expire_on_access() {
    let state = test_state().await;
    let overdue = overdue_round1_session();
    let session_id = overdue.id;
    assert_eq!(
        store(&state).await.insert_session(overdue).await.unwrap(),
        InsertOutcome::Inserted
    );

    let err = game_service::submit_answer(&state, session_id, demo::ALEX, 101, "A")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::SessionExpired(id) if id == session_id));

    let stored = session(&state, session_id).await;
    assert_eq!(stored.status, SessionStatus::Expired);
    assert!(stored.completed_at.is_some());

    let err = game_service::get_current_question(&state, session_id, demo::ALEX)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::SessionExpired(_)));

    // The couple is free to play again.
    assert!(
        game_service::get_latest_active_session_for_user(&state, demo::ALEX)
            .await
            .unwrap()
            .is_none()
    );
    game_service::create_invitation(&state, demo::ALEX, demo::CATEGORY)
        .await
        .unwrap();
}

#[tokio::test]
async fn overdue_sessions_are_not_scored() {
    let state = test_state().await;
    let overdue = GameSessionEntity {
        status: SessionStatus::Round2,
        ..overdue_round1_session()
    };
    let session_id = overdue.id;
    store(&state).await.insert_session(overdue).await.unwrap();

    let err = game_service::calculate_and_complete_game(&state, session_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::SessionExpired(id) if id == session_id));

    let stored = session(&state, session_id).await;
    assert_eq!(stored.status, SessionStatus::Expired);
    assert_eq!(stored.player1_score, None);
}

#[tokio::test]
async fn sweeper_expires_overdue_sessions() {
    let state = test_state().await;
    let overdue = overdue_round1_session();
    let session_id = overdue.id;
    store(&state).await.insert_session(overdue).await.unwrap();

    let expired = game_service::expire_stale_sessions(&state, SystemTime::now())
        .await
        .unwrap();
    assert_eq!(expired, 1);
    assert_eq!(session(&state, session_id).await.status, SessionStatus::Expired);
    assert_eq!(
        game_service::expire_stale_sessions(&state, SystemTime::now())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn active_summary_tracks_progress() {
    let state = test_state().await;
    assert!(
        query_service::active_session_summary(&state, demo::ALEX)
            .await
            .unwrap()
            .is_none()
    );

    let invitation = game_service::create_invitation(&state, demo::ALEX, demo::CATEGORY)
        .await
        .unwrap();
    let invited = query_service::active_session_summary(&state, demo::SAM)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invited.session_id, invitation.payload.session_id);
    assert_eq!(invited.status, SessionStatus::Invited);
    assert_eq!(invited.round, None);
    assert_eq!(invited.current_question_number, None);
    assert_eq!(invited.total_questions, 8);
    assert_eq!(invited.partner_name, "Alex");
    assert!(invited.can_continue);

    let started = game_service::accept_invitation(&state, invited.session_id, demo::SAM)
        .await
        .unwrap();
    let order = started.session.question_order;
    game_service::submit_answer(&state, invited.session_id, demo::ALEX, order[0], "A")
        .await
        .unwrap();
    game_service::submit_answer(&state, invited.session_id, demo::SAM, order[0], "A")
        .await
        .unwrap();

    let playing = query_service::active_session_summary(&state, demo::ALEX)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(playing.round, Some(Round::Round1));
    assert_eq!(playing.current_question_number, Some(2));
    assert_eq!(playing.partner_name, "Sam");
    assert!(playing.started_at.is_some());
}

#[tokio::test]
async fn history_filters_by_winner() {
    let state = test_state().await;
    let store = store(&state).await;
    let base = SystemTime::now() - Duration::from_secs(10 * 24 * 3600);
    let day = Duration::from_secs(24 * 3600);
    for (offset, scores) in [(0, (7, 4)), (1, (3, 6)), (2, (5, 5))] {
        store
            .insert_session(completed_session(scores, base + day * offset))
            .await
            .unwrap();
    }

    let query = |winner: Option<&str>| HistoryQuery {
        winner: winner.map(str::to_owned),
        ..HistoryQuery::default()
    };

    let mine = query_service::history(&state, demo::ALEX, query(Some("self")))
        .await
        .unwrap();
    assert_eq!(mine.total_elements, 1);
    assert_eq!((mine.items[0].my_score, mine.items[0].partner_score), (7, 4));
    assert_eq!(mine.items[0].result, GameOutcome::Win);
    assert_eq!(mine.items[0].partner_name, "Sam");

    let theirs = query_service::history(&state, demo::ALEX, query(Some(" Partner ")))
        .await
        .unwrap();
    assert_eq!(theirs.total_elements, 1);
    assert_eq!(theirs.items[0].result, GameOutcome::Loss);

    let everything = query_service::history(&state, demo::ALEX, query(Some("all")))
        .await
        .unwrap();
    assert_eq!(everything.total_elements, 3);
    // Newest first by default.
    assert_eq!(everything.items[0].result, GameOutcome::Draw);
    assert_eq!(everything.total_pages, 1);
    assert!(!everything.has_next);

    // Scores are mirrored for the partner.
    let sam = query_service::history(&state, demo::SAM, query(Some("self")))
        .await
        .unwrap();
    assert_eq!((sam.items[0].my_score, sam.items[0].partner_score), (6, 3));
}

#[tokio::test]
async fn history_pages_and_sorts() {
    let state = test_state().await;
    let store = store(&state).await;
    let base = SystemTime::now() - Duration::from_secs(30 * 24 * 3600);
    let day = Duration::from_secs(24 * 3600);
    for offset in 0..5u32 {
        store
            .insert_session(completed_session((offset, 0), base + day * offset))
            .await
            .unwrap();
    }

    let page = query_service::history(
        &state,
        demo::ALEX,
        HistoryQuery {
            page: Some(1),
            size: Some(2),
            sort: Some("oldest".into()),
            winner: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(page.total_elements, 5);
    assert_eq!(page.total_pages, 3);
    assert!(page.has_next);
    let scores: Vec<u32> = page.items.iter().map(|item| item.my_score).collect();
    assert_eq!(scores, vec![2, 3]);

    let beyond = query_service::history(
        &state,
        demo::ALEX,
        HistoryQuery {
            page: Some(9),
            ..HistoryQuery::default()
        },
    )
    .await
    .unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total_elements, 5);
    assert!(!beyond.has_next);
}

#[tokio::test]
async fn huge_page_numbers_give_an_empty_page() {
    let state = test_state().await;
    store(&state)
        .await
        .insert_session(completed_session((4, 2), SystemTime::now()))
        .await
        .unwrap();

    let page = query_service::history(
        &state,
        demo::ALEX,
        HistoryQuery {
            page: Some(i64::MAX),
            size: Some(50),
            ..HistoryQuery::default()
        },
    )
    .await
    .unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.total_elements, 1);
    assert_eq!(page.total_pages, 1);
    assert!(!page.has_next);
}

#[tokio::test]
async fn dashboard_and_badges_for_a_new_couple_member() {
    let state = test_state().await;
    let stats = query_service::dashboard_stats(&state, demo::JORDAN).await.unwrap();
    assert_eq!(stats.games_played, 0);
    assert!(query_service::badges(&state, demo::JORDAN).await.unwrap().is_empty());

    let store = store(&state).await;
    let now = SystemTime::now();
    store
        .insert_session(completed_session((7, 2), now - Duration::from_secs(60)))
        .await
        .unwrap();

    let stats = query_service::dashboard_stats(&state, demo::ALEX).await.unwrap();
    assert_eq!(stats.games_played, 1);
    assert_eq!(stats.best_score, 7);
    assert_eq!(stats.average_score, 7.0);
    assert_eq!(stats.streak_days, 1);
    assert_eq!(stats.invitation_acceptance_rate, 100.0);
    assert_eq!(stats.avg_invitation_response_seconds, 60.0);

    let codes: Vec<&str> = query_service::badges(&state, demo::ALEX)
        .await
        .unwrap()
        .iter()
        .map(|badge| badge.code)
        .collect();
    assert_eq!(codes, vec!["FIRST_GAME", "SHARP_GUESSER"]);
}
