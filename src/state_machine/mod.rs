//! # Message Status State Machine
//!
//! `Created → InProcess → {Completed, Aborted}`. Status changes happen only
//! through the status/log writer, which consults [`plan_transition`] before
//! touching the status column.

pub mod errors;
pub mod states;
pub mod transitions;

pub use errors::{TransitionError, TransitionResult};
pub use states::{MessageStatus, StatusUpdate};
pub use transitions::{plan_transition, TransitionPlan};
