//! Integration tests for timers and macros
//!
//! These tests validate:
//! - Timer creation, start/stop and removal with their scheduled events
//! - Macro recording, execution and erasure

#![cfg(feature = "mock-board")]

mod common;

use boardlink::backend::MockBoard;
use boardlink::registry::opcodes::timer::REPEAT_FOREVER;
use boardlink::types::ResourceClass;
use boardlink::BoardError;
use common::mock_helpers::connected_board;

#[tokio::test]
async fn test_timer_schedule_and_remove() {
    let (mock, board, _events) = connected_board(MockBoard::new()).await;

    let timer = board.create_timer(1000, REPEAT_FOREVER, false).await.unwrap();
    assert_eq!(timer, 0);
    assert_eq!(
        mock.take_writes(),
        vec![vec![0x0c, 0x02, 0xe8, 0x03, 0x00, 0x00, 0xff, 0xff, 0x00]]
    );

    let events = board
        .schedule(timer, |r| {
            r.write(&[0x02, 0x03, 0x01]);
        })
        .await
        .unwrap();
    assert_eq!(events, vec![0]);
    assert_eq!(
        mock.take_writes(),
        vec![
            vec![0x0a, 0x02, 0x0c, 0x06, 0x00, 0x02, 0x03, 0x01],
            vec![0x0a, 0x03, 0x01],
        ]
    );
    assert_eq!(board.timers()[0].events, vec![0]);
    assert_eq!(
        mock.event_config(0),
        Some(vec![0x0c, 0x06, 0x00, 0x02, 0x03, 0x01, 0x01])
    );

    board.start_timer(timer).unwrap();
    board.stop_timer(timer).unwrap();
    assert_eq!(
        mock.take_writes(),
        vec![vec![0x0c, 0x03, 0x00], vec![0x0c, 0x04, 0x00]]
    );

    board.remove_timer(timer).unwrap();
    assert_eq!(
        mock.take_writes(),
        vec![vec![0x0a, 0x04, 0x00], vec![0x0c, 0x05, 0x00]]
    );
    assert!(board.timers().is_empty());
    assert!(mock.live_ids(ResourceClass::Timer).is_empty());
    assert!(mock.live_ids(ResourceClass::Event).is_empty());
}

#[tokio::test]
async fn test_unknown_timer_is_rejected() {
    let (mock, board, _events) = connected_board(MockBoard::new()).await;
    assert!(matches!(
        board.start_timer(3),
        Err(BoardError::InvalidOperation(_))
    ));
    assert!(matches!(
        board.schedule(3, |r| {
            r.write(&[0x02, 0x03, 0x01]);
        })
        .await,
        Err(BoardError::InvalidOperation(_))
    ));
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn test_record_and_execute_macro() {
    let (mock, board, _events) = connected_board(MockBoard::new()).await;
    let commands = vec![vec![0x02, 0x03, 0x01], vec![0x03, 0x02, 0x01]];

    let id = board.record_macro(true, &commands).await.unwrap();
    assert_eq!(id, 0);
    assert_eq!(
        mock.take_writes(),
        vec![
            vec![0x0f, 0x02, 0x01],
            vec![0x0f, 0x03, 0x02, 0x03, 0x01],
            vec![0x0f, 0x03, 0x03, 0x02, 0x01],
            vec![0x0f, 0x04],
        ]
    );
    assert_eq!(mock.macro_commands(0), Some(commands.clone()));
    assert_eq!(board.macros()[0].commands, commands);

    board.execute_macro(id).unwrap();
    assert_eq!(mock.take_writes(), vec![vec![0x0f, 0x05, 0x00]]);

    board.erase_macros().unwrap();
    assert_eq!(mock.take_writes(), vec![vec![0x0f, 0x08]]);
    assert!(board.macros().is_empty());
    assert!(matches!(
        board.execute_macro(id),
        Err(BoardError::InvalidOperation(_))
    ));

    // erased ids are handed out again
    assert_eq!(board.record_macro(false, &commands).await.unwrap(), 0);
}
