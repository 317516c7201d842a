//! Prompt-side bookkeeping: token estimates, session accounting, and the
//! truncation ladder that keeps outgoing requests under the ceiling.

pub mod accounting;
pub mod token;
pub mod truncation;

pub use accounting::{normalize_usage, TokenAccounting, TokenTotals};
pub use token::{estimate_message_tokens, estimate_messages_tokens, estimate_tokens};
pub use truncation::{recent_window, LadderOutcome, Rung, TruncationLadder};
