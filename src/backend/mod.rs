//! Board link backends
//!
//! The engine talks to a board through the [`Transport`] trait: whole command
//! frames go out through `write`, and whoever owns the link feeds incoming
//! notifications to [`Board::handle_notification`](crate::board::Board::handle_notification).
//!
//! # Components
//!
//! - [`Transport`] - Write half of the link, implemented by the BLE glue
//! - [`TransportStats`] - Traffic counters kept by the board
//! - [`MockBoard`] - Simulated board for testing without hardware (feature-gated)

#[cfg(feature = "mock-board")]
pub mod mock_board;
pub mod transport;

#[cfg(feature = "mock-board")]
pub use mock_board::{MockBoard, MockModule};
pub use transport::{Transport, TransportStats};
