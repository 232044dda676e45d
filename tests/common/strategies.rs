use courier_core::{MessageStatus, StatusUpdate};
use proptest::prelude::*;

/// Any status a log call can request
pub fn status_strategy() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Created),
        Just(MessageStatus::InProcess),
        Just(MessageStatus::Completed),
        Just(MessageStatus::Aborted),
    ]
}

/// Status argument of a log call, `Unchanged` included
pub fn status_update_strategy() -> impl Strategy<Value = StatusUpdate> {
    prop_oneof![
        2 => Just(StatusUpdate::Unchanged),
        3 => status_strategy().prop_map(StatusUpdate::To),
    ]
}

/// Which writer method a generated call goes through
#[derive(Debug, Clone, Copy)]
pub enum LogCall {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
}

pub fn log_call_strategy() -> impl Strategy<Value = (LogCall, StatusUpdate)> {
    let call = prop_oneof![
        Just(LogCall::Trace),
        Just(LogCall::Debug),
        Just(LogCall::Information),
        Just(LogCall::Warning),
        Just(LogCall::Error),
        Just(LogCall::Critical),
    ];
    (call, status_update_strategy())
}

pub fn log_sequence_strategy() -> impl Strategy<Value = Vec<(LogCall, StatusUpdate)>> {
    prop::collection::vec(log_call_strategy(), 1..24)
}
