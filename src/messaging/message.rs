//! # Message Traits and Identifiers
//!
//! Every payload that crosses the bus implements [`Message`]. Requests add the
//! response type they expect; a request whose `Response` is `()` is fire-and-forget.

use crate::constants::MESSAGE_TYPE_NAMESPACE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::{type_name, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A serializable payload known to the bus.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Canonical name hashed into the durable message-type identifier.
    ///
    /// Defaults to the compiler's type name. Types whose records outlive a
    /// rename or a toolchain upgrade should return a fixed name instead.
    fn message_name() -> Cow<'static, str> {
        Cow::Borrowed(type_name::<Self>())
    }
}

/// A message that is dispatched to exactly one handler.
pub trait Request: Message {
    /// `()` for fire-and-forget requests
    type Response: Message;
}

/// A message published for observation rather than dispatched to a handler
pub trait Event: Message {}

macro_rules! impl_message_for {
    ($($ty:ty),* $(,)?) => {
        $(impl Message for $ty {})*
    };
}

impl_message_for!(
    (),
    bool,
    i8,
    i16,
    i32,
    i64,
    i128,
    u8,
    u16,
    u32,
    u64,
    u128,
    f32,
    f64,
    String,
    serde_json::Value,
);

impl<T: Message> Message for Vec<T> {}
impl<T: Message> Message for Option<T> {}

/// True when `T` is the unit type used for fire-and-forget responses
pub fn is_void<T: ?Sized + 'static>() -> bool {
    TypeId::of::<T>() == TypeId::of::<()>()
}

/// Runtime type identity used as a registry key.
///
/// Equality and hashing use only the `TypeId`; the name is carried for error
/// messages and logs.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Identifier of one persisted message; generated per dispatch, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Durable identifier of a message type: UUID v5 of its canonical name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTypeId(Uuid);

impl MessageTypeId {
    pub fn from_name(canonical_name: &str) -> Self {
        Self(Uuid::new_v5(&MESSAGE_TYPE_NAMESPACE, canonical_name.as_bytes()))
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MessageTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Optimistic concurrency token on a message envelope.
///
/// Regenerated on every status write; a writer holding a stale token loses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncToken(Uuid);

impl SyncToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Ping;

    impl Message for Ping {}

    #[derive(Serialize, Deserialize)]
    struct Renamed;

    impl Message for Renamed {
        fn message_name() -> Cow<'static, str> {
            Cow::Borrowed("orders.renamed.v1")
        }
    }

    #[test]
    fn test_default_message_name_is_type_name() {
        assert!(Ping::message_name().ends_with("Ping"));
        assert_eq!(Renamed::message_name(), "orders.renamed.v1");
    }

    #[test]
    fn test_type_key_equality_ignores_name() {
        assert_eq!(TypeKey::of::<Ping>(), TypeKey::of::<Ping>());
        assert_ne!(TypeKey::of::<Ping>(), TypeKey::of::<Renamed>());
        assert!(TypeKey::of::<Ping>().is::<Ping>());
    }

    #[test]
    fn test_void_detection() {
        assert!(is_void::<()>());
        assert!(!is_void::<i32>());
    }

    #[test]
    fn test_message_type_id_is_deterministic() {
        let first = MessageTypeId::from_name("orders.renamed.v1");
        let second = MessageTypeId::from_name("orders.renamed.v1");
        assert_eq!(first, second);
        assert_ne!(first, MessageTypeId::from_name("orders.renamed.v2"));
        assert_eq!(first.as_uuid().get_version_num(), 5);
    }

    #[test]
    fn test_message_type_id_is_pinned_across_releases() {
        // Persisted rows carry this id; it must never drift.
        let expected = Uuid::parse_str("d60e306e-9d91-5844-a006-2ef1b1c09063").unwrap();
        assert_eq!(
            MessageTypeId::from_name("orders.renamed.v1"),
            MessageTypeId::from_uuid(expected)
        );
        assert_eq!(
            MessageTypeId::from_name(&Renamed::message_name()),
            MessageTypeId::from_uuid(expected)
        );
    }

    #[test]
    fn test_message_ids_are_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
        assert!(!MessageId::new().is_nil());
    }
}
