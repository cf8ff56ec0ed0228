//! Integration tests for route lifecycle
//!
//! These tests validate the complete route workflow against a simulated board:
//! - Stream subscription, start/stop and removal commands
//! - Processor id correlation for named nodes and runtime edits
//! - Teardown as the exact inverse of creation
//! - Compile errors that send nothing
//! - Shared raw subscriptions and cross-route named operands

#![cfg(feature = "mock-board")]

mod common;

use boardlink::backend::MockBoard;
use boardlink::error::{BoardError, CompileError};
use boardlink::route::{ComparisonMode, ComparisonOp, MapOp, NodeEdit, NodeKind, Operand, RouteGraph};
use boardlink::signal::catalog;
use boardlink::types::{DataValue, ResourceClass};
use boardlink::BoardEvent;
use common::builders::{acceleration_stream, rms_accumulate_log, switch_stream};
use common::mock_helpers::{connected_board, drain_events, settle};

#[tokio::test]
async fn test_stream_subscribe_start_stop_remove() {
    let (mock, board, _events) = connected_board(MockBoard::new()).await;

    let route = board.create_route(acceleration_stream()).await.unwrap();
    assert_eq!(mock.take_writes(), vec![vec![0x03, 0x04, 0x01]]);

    board.start_route(route).unwrap();
    board.stop_route(route).unwrap();
    assert_eq!(
        mock.take_writes(),
        vec![vec![0x03, 0x02, 0x01], vec![0x03, 0x02, 0x00]]
    );

    board.remove_route(route).unwrap();
    assert_eq!(mock.take_writes(), vec![vec![0x03, 0x04, 0x00]]);
    assert!(board.routes().is_empty());
}

#[tokio::test]
async fn test_streamed_frame_becomes_data_event() {
    let (mock, board, events) = connected_board(MockBoard::new()).await;
    let route = board.create_route(acceleration_stream()).await.unwrap();

    mock.notify(&[0x03, 0x04, 0x00, 0x40, 0x00, 0x00, 0x00, 0xc0]);
    settle().await;

    let data: Vec<_> = drain_events(&events)
        .into_iter()
        .filter_map(|e| match e {
            BoardEvent::Data {
                route: r, sample, ..
            } => Some((r, sample.value)),
            _ => None,
        })
        .collect();
    assert_eq!(
        data,
        vec![(route, DataValue::Vector(vec![1.0, 0.0, -1.0]))]
    );
}

#[tokio::test]
async fn test_unroutable_frame_is_reported_unhandled() {
    let (mock, _board, events) = connected_board(MockBoard::new()).await;
    mock.notify(&[0x05, 0x01, 0x02]);
    settle().await;
    assert_eq!(
        drain_events(&events),
        vec![BoardEvent::Unhandled(vec![0x05, 0x01, 0x02])]
    );
}

#[tokio::test]
async fn test_started_route_is_stopped_on_remove() {
    let (mock, board, _events) = connected_board(MockBoard::new()).await;
    let route = board.create_route(acceleration_stream()).await.unwrap();
    board.start_route(route).unwrap();
    mock.clear_writes();

    board.remove_route(route).unwrap();
    assert_eq!(
        mock.take_writes(),
        vec![vec![0x03, 0x02, 0x00], vec![0x03, 0x04, 0x00]]
    );
}

#[tokio::test]
async fn test_named_processors_take_board_ids() {
    let (mock, board, _events) = connected_board(MockBoard::new()).await;
    let route = board
        .create_route(rms_accumulate_log("rms", "total"))
        .await
        .unwrap();

    let writes = mock.take_writes();
    assert_eq!(writes.len(), 3);
    assert_eq!(&writes[0][..5], &[0x09, 0x02, 0x13, 0x05, 0xff]);
    assert_eq!(&writes[1][..5], &[0x09, 0x02, 0x09, 0x03, 0x00]);
    assert_eq!(&writes[2][..5], &[0x0b, 0x02, 0x09, 0x03, 0x01]);
    assert_eq!(mock.processor_config(1).as_deref(), Some(&writes[1][2..]));
    assert_eq!(mock.logger_config(0).as_deref(), Some(&writes[2][2..]));
    assert_eq!(
        board.route(route).unwrap().logger_ids().collect::<Vec<_>>(),
        vec![0]
    );

    board
        .edit(
            "rms",
            NodeEdit::Config(NodeKind::Map {
                op: MapOp::Rss,
                operand: Operand::from(0.0f32),
            }),
        )
        .unwrap();
    let edit = mock.take_writes();
    assert_eq!(edit.len(), 1);
    assert_eq!(&edit[0][..3], &[0x09, 0x05, 0x00]);
    assert_eq!(&mock.processor_config(0).unwrap()[4..], &edit[0][3..]);

    board.edit("total", NodeEdit::SetState(2.0)).unwrap();
    let state = mock.take_writes();
    assert_eq!(state.len(), 1);
    assert_eq!(&state[0][..3], &[0x09, 0x04, 0x01]);
    assert_eq!(state[0].len(), 7);
}

#[tokio::test]
async fn test_edit_cannot_change_processor_type() {
    let (mock, board, _events) = connected_board(MockBoard::new()).await;
    board
        .create_route(rms_accumulate_log("rms", "total"))
        .await
        .unwrap();
    mock.clear_writes();

    let err = board
        .edit("rms", NodeEdit::Config(NodeKind::Accumulate))
        .unwrap_err();
    assert!(matches!(err, BoardError::InvalidOperation(_)));
    assert!(matches!(
        board.edit("missing", NodeEdit::ResetState),
        Err(BoardError::InvalidOperation(_))
    ));
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn test_teardown_is_inverse_of_creation() {
    let (mock, board, _events) = connected_board(MockBoard::new()).await;
    let graph = RouteGraph::build(catalog::switch(), |root| {
        root.react(|r| {
            r.write(&[0x02, 0x03, 0x01]);
        })
        .count()
        .name("presses")
        .log();
    });
    let route = board.create_route(graph).await.unwrap();
    let created = board.route(route).unwrap().created;
    assert_eq!(
        mock.live_ids(ResourceClass::Processor),
        vec![0],
        "counter should hold processor 0"
    );
    mock.clear_writes();

    board.remove_route(route).unwrap();
    let expected: Vec<Vec<u8>> = created
        .iter()
        .rev()
        .map(|resource| resource.teardown_command())
        .collect();
    assert_eq!(mock.take_writes(), expected);
    assert!(mock.live_ids(ResourceClass::Processor).is_empty());
    assert!(mock.live_ids(ResourceClass::Logger).is_empty());
    assert!(mock.live_ids(ResourceClass::Event).is_empty());

    // freed names can be reused
    let again = RouteGraph::build(catalog::switch(), |root| {
        root.count().name("presses").stream();
    });
    board.create_route(again).await.unwrap();
}

#[tokio::test]
async fn test_compile_errors_send_nothing() {
    let (mock, board, _events) = connected_board(MockBoard::new()).await;

    let unresolved = RouteGraph::build(catalog::pressure(), |root| {
        root.map(MapOp::Subtract, "baseline").stream();
    });
    assert!(matches!(
        board.create_route(unresolved).await,
        Err(BoardError::Compile(CompileError::UnresolvedName(n))) if n == "baseline"
    ));

    let overpacked = RouteGraph::build(catalog::acceleration(), |root| {
        root.pack(4).stream();
    });
    assert!(matches!(
        board.create_route(overpacked).await,
        Err(BoardError::Compile(CompileError::PackCapacity {
            requested: 4,
            max: 2
        }))
    ));

    assert!(mock.writes().is_empty());
    assert!(board.routes().is_empty());
}

#[tokio::test]
async fn test_duplicate_name_across_routes() {
    let (mock, board, _events) = connected_board(MockBoard::new()).await;
    board
        .create_route(rms_accumulate_log("rms", "total"))
        .await
        .unwrap();
    mock.clear_writes();

    let err = board
        .create_route(rms_accumulate_log("rms", "other"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BoardError::Compile(CompileError::DuplicateName(_))
    ));
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn test_shared_raw_subscription_is_refcounted() {
    let (mock, board, _events) = connected_board(MockBoard::new()).await;
    let first = board.create_route(switch_stream()).await.unwrap();
    let second = board.create_route(switch_stream()).await.unwrap();
    assert_eq!(mock.take_writes(), vec![vec![0x01, 0x01, 0x01]]);

    board.remove_route(first).unwrap();
    assert!(mock.take_writes().is_empty());

    board.remove_route(second).unwrap();
    assert_eq!(mock.take_writes(), vec![vec![0x01, 0x01, 0x00]]);
}

#[tokio::test]
async fn test_failed_route_releases_its_subscription() {
    let mock = MockBoard::new().with_silent(ResourceClass::Processor);
    let (mock, board, _events) = connected_board(mock).await;
    let graph = RouteGraph::build(catalog::switch(), |root| {
        let mut fan = root.multicast();
        fan.branch().stream();
        fan.branch().count().log();
    });

    let err = board.create_route(graph).await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error {}", err);
    assert!(board.routes().is_empty());
    let writes = mock.take_writes();
    assert_eq!(writes.first(), Some(&vec![0x01, 0x01, 0x01]));
    assert_eq!(writes.last(), Some(&vec![0x01, 0x01, 0x00]));

    // the register is no longer claimed, so a new owner subscribes afresh
    let route = board.create_route(switch_stream()).await.unwrap();
    assert_eq!(mock.take_writes(), vec![vec![0x01, 0x01, 0x01]]);
    board.remove_route(route).unwrap();
    assert_eq!(mock.take_writes(), vec![vec![0x01, 0x01, 0x00]]);
}

#[tokio::test]
async fn test_named_operand_from_another_route() {
    let (mock, board, _events) = connected_board(MockBoard::new()).await;
    let baseline = RouteGraph::build(catalog::temperature(0), |root| {
        root.average(4).name("avg").stream();
    });
    board.create_route(baseline).await.unwrap();
    mock.clear_writes();

    let graph = RouteGraph::build(catalog::temperature(0), |root| {
        root.filter(ComparisonOp::Gt, ComparisonMode::Absolute, "avg")
            .stream();
    });
    board.create_route(graph).await.unwrap();

    let writes = mock.take_writes();
    let entry = writes
        .iter()
        .find(|w| w[..2] == [0x0a, 0x02])
        .expect("feedback event entry");
    // fired by the average (processor 0), rewriting a processor config
    assert_eq!(&entry[..7], &[0x0a, 0x02, 0x09, 0x03, 0x00, 0x09, 0x05]);
    let params = writes
        .iter()
        .find(|w| w[..2] == [0x0a, 0x03])
        .expect("feedback event parameters");
    assert_eq!(params[2], 1, "parameters target the filter's processor id");
    assert_eq!(mock.live_ids(ResourceClass::Event), vec![0]);
}

#[tokio::test]
async fn test_operations_require_initialize() {
    let mock = std::sync::Arc::new(MockBoard::new());
    let (board, _events) = boardlink::Board::new(mock.clone(), common::fast_config());
    assert!(matches!(
        board.create_route(switch_stream()).await,
        Err(BoardError::InvalidOperation(_))
    ));
    assert!(mock.writes().is_empty());
}
