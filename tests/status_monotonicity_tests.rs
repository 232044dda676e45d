//! Status history of a message never moves backwards, whatever sequence of
//! log calls is made against it.

mod common;

use common::strategies::*;
use courier_core::messaging::MessageTypeId;
use courier_core::storage::NewMessage;
use courier_core::{
    InMemoryMessageStore, MessageId, MessageStatus, MessageStore, StatusLogWriter, StatusUpdate,
};
use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("simulated failure")]
struct Simulated;

fn persisted_message(store: &InMemoryMessageStore) -> MessageId {
    let tx = store.create_transaction().unwrap();
    let saved = store
        .save_request_message(
            tx.as_ref(),
            NewMessage::new(
                MessageTypeId::from_name("monotonicity.Peek"),
                "application/json",
                b"{}".to_vec(),
            ),
        )
        .unwrap()
        .unwrap();
    tx.commit().unwrap();
    saved.id
}

fn apply(writer: &StatusLogWriter, message_id: MessageId, call: LogCall, update: StatusUpdate) {
    let build = |p: &mut courier_core::storage::LogPayload| {
        p.message("generated");
    };
    match call {
        LogCall::Trace => writer.log_trace(message_id, update, build, None, None),
        LogCall::Debug => writer.log_debug(message_id, update, build, None, None),
        LogCall::Information => writer.log_information(message_id, update, build, None, None),
        LogCall::Warning => writer.log_warning(message_id, update, build, None, None),
        LogCall::Error => writer.log_error(message_id, update, &Simulated, build, None, None),
        LogCall::Critical => writer.log_critical(message_id, update, &Simulated, build, None, None),
    }
}

proptest! {
    /// Property: recorded statuses are non-decreasing and never return to Created
    #[test]
    fn recorded_status_history_is_monotonic(calls in log_sequence_strategy()) {
        let store = InMemoryMessageStore::new();
        let message_id = persisted_message(&store);
        let writer = StatusLogWriter::new(Arc::new(store.clone()), "prop-host", Uuid::new_v4());

        for (call, update) in &calls {
            apply(&writer, message_id, *call, *update);
        }

        let entries = store.log_entries(message_id).unwrap();
        prop_assert_eq!(entries.len(), calls.len());

        let ranks: Vec<u8> = entries.iter().map(|entry| entry.status.rank()).collect();
        prop_assert!(
            ranks.windows(2).all(|pair| pair[0] <= pair[1]),
            "status went backwards: {:?}",
            entries.iter().map(|e| e.status).collect::<Vec<_>>()
        );

        let terminal = entries.iter().position(|entry| entry.status.is_terminal());
        if let Some(first_terminal) = terminal {
            let settled = entries[first_terminal].status;
            prop_assert!(entries[first_terminal..].iter().all(|entry| entry.status == settled));
        }

        let envelope = store.find_envelope(message_id).unwrap().unwrap();
        prop_assert_eq!(envelope.status, entries.last().unwrap().status);
    }

    /// Property: `Unchanged` calls never write the status column
    #[test]
    fn unchanged_calls_leave_status_untouched(count in 1usize..12) {
        let store = InMemoryMessageStore::new();
        let message_id = persisted_message(&store);
        let before = store.find_envelope(message_id).unwrap().unwrap();
        let writer = StatusLogWriter::new(Arc::new(store.clone()), "prop-host", Uuid::new_v4());

        for _ in 0..count {
            apply(&writer, message_id, LogCall::Debug, StatusUpdate::Unchanged);
        }

        let after = store.find_envelope(message_id).unwrap().unwrap();
        prop_assert_eq!(after.status, MessageStatus::Created);
        prop_assert_eq!(after.sync_token, before.sync_token);
        prop_assert_eq!(store.log_entries(message_id).unwrap().len(), count);
    }
}
