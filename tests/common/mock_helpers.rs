//! Mock board helpers for testing

use std::sync::Arc;
use std::time::Duration;

use boardlink::backend::MockBoard;
use boardlink::board::{Board, BoardEvent};
use boardlink::config::EngineConfig;
use crossbeam_channel::Receiver;

use super::{fast_config, init_tracing};

/// Let the mock's reply pump deliver everything queued so far
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Attach `mock` to a fresh board and initialize it
///
/// Writes made during initialization are cleared so tests only see their own.
pub async fn connected_board(mock: MockBoard) -> (Arc<MockBoard>, Board, Receiver<BoardEvent>) {
    connected_board_with(mock, fast_config()).await
}

pub async fn connected_board_with(
    mock: MockBoard,
    config: EngineConfig,
) -> (Arc<MockBoard>, Board, Receiver<BoardEvent>) {
    init_tracing();
    let mock = Arc::new(mock);
    let (board, events) = Board::new(mock.clone(), config);
    mock.attach(&board);
    board
        .initialize()
        .await
        .expect("mock board should initialize");
    mock.clear_writes();
    (mock, board, events)
}

/// Every event received so far
pub fn drain_events(events: &Receiver<BoardEvent>) -> Vec<BoardEvent> {
    events.try_iter().collect()
}
