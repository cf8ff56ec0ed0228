//! Integration tests for resource id correlation
//!
//! These tests validate how board-assigned ids are paired with requests:
//! - Exhausted classes fail without transmitting
//! - Silent boards time out and late replies are dropped
//! - A disconnect fails everything pending
//! - Concurrent allocations of one class bind in wire order

#![cfg(feature = "mock-board")]

mod common;

use std::time::Instant;

use boardlink::backend::MockBoard;
use boardlink::registry::opcodes::timer::REPEAT_FOREVER;
use boardlink::types::ResourceClass;
use boardlink::{BoardError, BoardEvent};
use common::builders::{rms_accumulate_log, switch_log};
use common::mock_helpers::{connected_board, drain_events, settle};
use common::test_timeout;

#[tokio::test]
async fn test_exhausted_class_fails_without_transmitting() {
    let mock = MockBoard::new().with_capacity(ResourceClass::Timer, 2);
    let (mock, board, _events) = connected_board(mock).await;

    assert_eq!(board.create_timer(10, 1, false).await.unwrap(), 0);
    assert_eq!(board.create_timer(10, 1, false).await.unwrap(), 1);
    mock.clear_writes();

    let started = Instant::now();
    let err = board
        .create_timer(10, REPEAT_FOREVER, false)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() < test_timeout());
    assert!(mock.writes().is_empty());

    board.remove_timer(0).unwrap();
    assert_eq!(board.create_timer(10, 1, false).await.unwrap(), 0);
}

#[tokio::test]
async fn test_silent_board_times_out_and_late_reply_is_dropped() {
    let mock = MockBoard::new().with_silent(ResourceClass::Logger);
    let (mock, board, _events) = connected_board(mock).await;

    let err = board.create_route(switch_log()).await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error {}", err);
    assert_eq!(board.stats().pending, 0);

    // the reply the board never sent arrives after the waiter gave up
    mock.notify(&[0x0b, 0x02, 0x05]);
    settle().await;
    assert!(board.stats().transport.frames_dropped >= 1);

    mock.set_silent(ResourceClass::Logger, false);
    let route = board.create_route(switch_log()).await.unwrap();
    assert_eq!(
        board.route(route).unwrap().logger_ids().collect::<Vec<_>>(),
        vec![0]
    );
}

#[tokio::test]
async fn test_disconnect_fails_pending_allocation() {
    let mock = MockBoard::new().with_silent(ResourceClass::Processor);
    let (_mock, board, events) = connected_board(mock).await;

    let pending = {
        let board = board.clone();
        tokio::spawn(async move { board.create_route(rms_accumulate_log("a", "b")).await })
    };
    settle().await;
    assert_eq!(board.stats().pending, 1);

    board.on_disconnect();
    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_connection_lost(), "unexpected error {}", err);
    assert!(drain_events(&events).contains(&BoardEvent::Disconnected));

    assert!(!board.is_initialized());
    assert!(matches!(
        board.create_timer(10, 1, false).await,
        Err(BoardError::InvalidOperation(_))
    ));

    board.initialize().await.unwrap();
    assert!(board.is_initialized());
}

#[tokio::test]
async fn test_concurrent_allocations_bind_in_order() {
    let (_mock, board, _events) = connected_board(MockBoard::new()).await;

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let board = board.clone();
            tokio::spawn(async move { board.create_timer(100, 1, false).await })
        })
        .collect();
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(board.stats().live[&ResourceClass::Timer], 3);
}
