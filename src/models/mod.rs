//! Data models for signals, positions, completed trades and bot status.

mod position;
mod signal;
mod status;
mod trade;

pub use position::{Position, PositionStatus};
pub use signal::{dedupe_signals, MarketSnapshot, Signal, TokenData};
pub use status::BotStatus;
pub use trade::{ExitReason, Trade};
