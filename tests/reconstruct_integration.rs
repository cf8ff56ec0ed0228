//! Integration tests for logger reconstruction
//!
//! These tests validate recovering logger bindings from board state alone:
//! - Processor chains followed back to their raw signal
//! - Synthetic names, including repeated roots
//! - Reconstructed bindings decoding a download
//! - Read timeouts aborting the whole reconstruction
//! - Sensor fusion calibration readback

#![cfg(feature = "mock-board")]

mod common;

use boardlink::backend::{MockBoard, MockModule};
use boardlink::registry::ModuleId;
use boardlink::types::{DataValue, ResourceClass};
use boardlink::{BoardError, BoardEvent};
use common::builders::{switch_log, EntryBuilder};
use common::mock_helpers::{connected_board, drain_events, settle};

/// RMS of angular velocity (processor 0) accumulated by processor 1 and
/// logged by logger 0, plus two loggers recording the switch
fn configured_board() -> MockBoard {
    MockBoard::new()
        .with_processor_config(0, &[0x13, 0x05, 0xff, 0xa0, 0x07, 0x05, 0x02, 0x01, 0x00])
        .with_processor_config(1, &[0x09, 0x03, 0x00, 0x20, 0x02, 0x0f])
        .with_logger_config(0, &[0x09, 0x03, 0x01, 0x60])
        .with_logger_config(2, &[0x01, 0x01, 0xff, 0x00])
        .with_logger_config(3, &[0x01, 0x01, 0xff, 0x00])
}

#[tokio::test]
async fn test_reconstruct_names_and_chains() {
    let (_mock, board, _events) = connected_board(configured_board()).await;

    let routes = board.reconstruct_loggers().await.unwrap();
    let mut names: Vec<_> = routes.iter().map(|r| r.name().to_string()).collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "angular-velocity/rms?id=0/accumulate?id=1",
            "switch",
            "switch~1",
        ]
    );

    let chained = routes
        .iter()
        .find(|r| r.name().starts_with("angular-velocity"))
        .unwrap();
    assert_eq!(chained.processor_ids().collect::<Vec<_>>(), vec![0, 1]);

    assert_eq!(board.bindings().len(), 3);
    let stats = board.stats();
    assert_eq!(stats.live[&ResourceClass::Logger], 3);
    assert_eq!(stats.live[&ResourceClass::Processor], 2);
}

#[tokio::test]
async fn test_reconstructed_ids_are_not_reallocated() {
    let (_mock, board, _events) = connected_board(configured_board()).await;
    board.reconstruct_loggers().await.unwrap();

    let route = board.create_route(switch_log()).await.unwrap();
    assert_eq!(
        board.route(route).unwrap().logger_ids().collect::<Vec<_>>(),
        vec![1]
    );
}

#[tokio::test]
async fn test_reconstructed_bindings_decode_downloads() {
    let mut entries = EntryBuilder::new(2).values([1]).build();
    entries.extend(EntryBuilder::new(3).starting_at(5).values([0]).build());
    let (_mock, board, events) =
        connected_board(configured_board().with_log_entries(entries)).await;

    board.reconstruct_loggers().await.unwrap();
    let summary = board.download(None).await.unwrap();
    assert_eq!(summary.samples, 2);
    assert_eq!(summary.unmatched, 0);

    settle().await;
    let mut logged: Vec<_> = drain_events(&events)
        .into_iter()
        .filter_map(|e| match e {
            BoardEvent::Log(s) => Some((s.binding, s.route, s.sample.value)),
            _ => None,
        })
        .collect();
    logged.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        logged,
        vec![
            ("switch".to_string(), None, DataValue::UInt(1)),
            ("switch~1".to_string(), None, DataValue::UInt(0)),
        ]
    );
}

#[tokio::test]
async fn test_read_timeout_aborts_reconstruction() {
    let mock = configured_board().with_silent_read(0x09, 0x02);
    let (_mock, board, _events) = connected_board(mock).await;

    let err = board.reconstruct_loggers().await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error {}", err);
    assert!(board.bindings().is_empty());
    assert_eq!(board.stats().live[&ResourceClass::Logger], 0);
}

#[tokio::test]
async fn test_empty_board_reconstructs_nothing() {
    let (_mock, board, _events) = connected_board(MockBoard::new()).await;
    assert!(board.reconstruct_loggers().await.unwrap().is_empty());
    assert!(board.bindings().is_empty());
}

#[tokio::test]
async fn test_calibration_readback() {
    let mock = MockBoard::new().with_calibration([1, 2, 3]);
    let (mock, board, _events) = connected_board(mock).await;

    let state = board.read_calibration().await.unwrap();
    assert_eq!(state.accelerometer, 1);
    assert_eq!(state.gyroscope, 2);
    assert_eq!(state.magnetometer, 3);
    assert_eq!(mock.writes(), vec![vec![0x19, 0x8b]]);
}

#[tokio::test]
async fn test_calibration_needs_recent_sensor_fusion() {
    let old = MockBoard::new().with_module(ModuleId::SensorFusion, MockModule::new(0, 0));
    let (mock, board, _events) = connected_board(old).await;
    assert!(matches!(
        board.read_calibration().await,
        Err(BoardError::InvalidOperation(_))
    ));
    assert!(mock.writes().is_empty());

    let (_mock, board, _events) =
        connected_board(MockBoard::new().without_module(ModuleId::SensorFusion)).await;
    assert!(matches!(
        board.read_calibration().await,
        Err(BoardError::InvalidOperation(_))
    ));
}
