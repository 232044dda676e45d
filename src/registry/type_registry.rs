//! # Type Registry
//!
//! Maps message types to durable identifiers and back. The identifier is a
//! UUID v5 of the type's canonical name, so it is stable across restarts and
//! is what gets written next to every persisted message.

use super::errors::{RegistrationError, RegistrationResult};
use crate::messaging::{is_void, Message, MessageTypeId, Request, TypeKey};
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    RequestVoid,
    RequestWithResponse,
    ResponseValue,
    Event,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestVoid => write!(f, "request_void"),
            Self::RequestWithResponse => write!(f, "request_with_response"),
            Self::ResponseValue => write!(f, "response_value"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// Identity record of one registered message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageType {
    id: MessageTypeId,
    name: String,
    kind: MessageKind,
    resolved_name: String,
    key: TypeKey,
}

impl MessageType {
    pub fn id(&self) -> MessageTypeId {
        self.id
    }

    /// Short human-readable name (module paths stripped)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Canonical name the identifier is computed from
    pub fn resolved_name(&self) -> &str {
        &self.resolved_name
    }

    pub fn type_key(&self) -> TypeKey {
        self.key
    }
}

/// What registering `T` would record; computed without touching a registry
#[derive(Debug, Clone)]
pub struct MessageTypeSpec {
    key: TypeKey,
    resolved_name: String,
}

impl MessageTypeSpec {
    pub fn of<T: Message>() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            resolved_name: T::message_name().into_owned(),
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn id(&self) -> MessageTypeId {
        MessageTypeId::from_name(&self.resolved_name)
    }
}

#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_type: HashMap<TypeId, MessageType>,
    by_id: HashMap<MessageTypeId, TypeId>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic identifier of `T`; independent of any registry state
    pub fn resolve<T: Message>() -> MessageTypeId {
        MessageTypeSpec::of::<T>().id()
    }

    /// Register `T` under `kind`. Re-registering with the same kind is a no-op.
    pub fn register<T: Message>(&mut self, kind: MessageKind) -> RegistrationResult<&MessageType> {
        self.commit(MessageTypeSpec::of::<T>(), kind)
    }

    /// Register a request type and, unless it is fire-and-forget, its response type
    pub fn register_request<R: Request>(&mut self) -> RegistrationResult<MessageTypeId> {
        let request_kind = request_kind::<R>();
        let response = (request_kind == MessageKind::RequestWithResponse)
            .then(MessageTypeSpec::of::<R::Response>);
        let (request, _) = self.commit_request(MessageTypeSpec::of::<R>(), request_kind, response)?;
        Ok(request.id())
    }

    pub fn lookup(&self, id: MessageTypeId) -> Option<&MessageType> {
        self.by_id
            .get(&id)
            .and_then(|type_id| self.by_type.get(type_id))
    }

    pub fn lookup_message_type(&self, key: TypeKey) -> Option<&MessageType> {
        self.by_type.get(&key.id())
    }

    pub fn message_type_of<T: 'static>(&self) -> Option<&MessageType> {
        self.by_type.get(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageType> {
        self.by_type.values()
    }

    /// Validate a registration without applying it
    pub(crate) fn check(&self, spec: &MessageTypeSpec, kind: MessageKind) -> RegistrationResult<()> {
        if let Some(existing) = self.by_type.get(&spec.key.id()) {
            if existing.kind == kind {
                return Ok(());
            }
            return Err(RegistrationError::ConflictingMessageType {
                type_name: spec.key.name().to_string(),
                registered: existing.kind.to_string(),
                requested: kind.to_string(),
            });
        }

        let id = spec.id();
        if let Some(other) = self.by_id.get(&id).and_then(|t| self.by_type.get(t)) {
            return Err(RegistrationError::MessageTypeIdCollision {
                id: id.to_string(),
                existing: other.key.name().to_string(),
                incoming: spec.key.name().to_string(),
            });
        }
        Ok(())
    }

    /// Validate a request and its response type as one registration
    pub(crate) fn check_request(
        &self,
        request: &MessageTypeSpec,
        request_kind: MessageKind,
        response: Option<&MessageTypeSpec>,
    ) -> RegistrationResult<()> {
        self.check(request, request_kind)?;
        let Some(response) = response else {
            return Ok(());
        };
        self.check(response, MessageKind::ResponseValue)?;

        if response.key == request.key {
            return Err(RegistrationError::ConflictingMessageType {
                type_name: request.key.name().to_string(),
                registered: request_kind.to_string(),
                requested: MessageKind::ResponseValue.to_string(),
            });
        }
        let id = request.id();
        if response.id() == id {
            return Err(RegistrationError::MessageTypeIdCollision {
                id: id.to_string(),
                existing: request.key.name().to_string(),
                incoming: response.key.name().to_string(),
            });
        }
        Ok(())
    }

    /// Record a request and its response type, or neither
    pub(crate) fn commit_request(
        &mut self,
        request: MessageTypeSpec,
        request_kind: MessageKind,
        response: Option<MessageTypeSpec>,
    ) -> RegistrationResult<(MessageType, Option<MessageType>)> {
        self.check_request(&request, request_kind, response.as_ref())?;
        let response = match response {
            Some(spec) => Some(self.commit(spec, MessageKind::ResponseValue)?.clone()),
            None => None,
        };
        let request = self.commit(request, request_kind)?.clone();
        Ok((request, response))
    }

    pub(crate) fn commit(
        &mut self,
        spec: MessageTypeSpec,
        kind: MessageKind,
    ) -> RegistrationResult<&MessageType> {
        self.check(&spec, kind)?;
        let type_id = spec.key.id();
        if !self.by_type.contains_key(&type_id) {
            let id = spec.id();
            debug!(message_type = %spec.key, id = %id, kind = %kind, "Registered message type");
            self.by_id.insert(id, type_id);
            self.by_type.insert(
                type_id,
                MessageType {
                    id,
                    name: short_name(&spec.resolved_name),
                    kind,
                    resolved_name: spec.resolved_name,
                    key: spec.key,
                },
            );
        }
        self.by_type
            .get(&type_id)
            .ok_or_else(|| RegistrationError::HandlerContractViolation {
                handler: spec.key.name().to_string(),
                expected: "registered message type".to_string(),
                actual: "missing".to_string(),
            })
    }
}

pub(crate) fn request_kind<R: Request>() -> MessageKind {
    if is_void::<R::Response>() {
        MessageKind::RequestVoid
    } else {
        MessageKind::RequestWithResponse
    }
}

/// Strip module paths from every path segment: `a::b::Vec<c::D>` → `Vec<D>`
fn short_name(resolved: &str) -> String {
    fn last_segment(path: &str) -> &str {
        path.rsplit("::").next().unwrap_or(path)
    }

    let mut out = String::with_capacity(resolved.len());
    let mut segment = String::new();
    for ch in resolved.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == ':' {
            segment.push(ch);
        } else {
            out.push_str(last_segment(&segment));
            segment.clear();
            out.push(ch);
        }
    }
    out.push_str(last_segment(&segment));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::borrow::Cow;

    #[derive(Serialize, Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    impl Message for Add {}
    impl Request for Add {
        type Response = i64;
    }

    #[derive(Serialize, Deserialize)]
    struct Ping;

    impl Message for Ping {}
    impl Request for Ping {
        type Response = ();
    }

    #[derive(Serialize, Deserialize)]
    struct Impostor;

    impl Message for Impostor {
        fn message_name() -> Cow<'static, str> {
            Ping::message_name()
        }
    }

    #[test]
    fn test_resolve_is_idempotent() {
        assert_eq!(TypeRegistry::resolve::<Add>(), TypeRegistry::resolve::<Add>());
        assert_ne!(TypeRegistry::resolve::<Add>(), TypeRegistry::resolve::<Ping>());
        assert_eq!(
            TypeRegistry::resolve::<Add>(),
            MessageTypeId::from_name(std::any::type_name::<Add>())
        );
    }

    #[test]
    fn test_register_request_records_both_types() {
        let mut registry = TypeRegistry::new();
        let id = registry.register_request::<Add>().unwrap();

        let add = registry.lookup(id).unwrap();
        assert_eq!(add.kind(), MessageKind::RequestWithResponse);
        assert_eq!(add.name(), "Add");
        assert_eq!(
            registry.message_type_of::<i64>().map(|t| t.kind()),
            Some(MessageKind::ResponseValue)
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_void_request_does_not_register_unit() {
        let mut registry = TypeRegistry::new();
        registry.register_request::<Ping>().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.message_type_of::<Ping>().map(|t| t.kind()),
            Some(MessageKind::RequestVoid)
        );
    }

    #[test]
    fn test_same_registration_twice_is_a_noop() {
        let mut registry = TypeRegistry::new();
        let first = registry.register::<Ping>(MessageKind::RequestVoid).unwrap().id();
        let second = registry.register::<Ping>(MessageKind::RequestVoid).unwrap().id();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_conflicting_kind_is_rejected() {
        let mut registry = TypeRegistry::new();
        registry.register::<Ping>(MessageKind::RequestVoid).unwrap();

        let result = registry.register::<Ping>(MessageKind::Event);
        assert!(matches!(
            result,
            Err(RegistrationError::ConflictingMessageType { .. })
        ));
    }

    #[test]
    fn test_identifier_collision_between_distinct_types_is_rejected() {
        let mut registry = TypeRegistry::new();
        registry.register::<Ping>(MessageKind::RequestVoid).unwrap();

        let result = registry.register::<Impostor>(MessageKind::Event);
        assert!(matches!(
            result,
            Err(RegistrationError::MessageTypeIdCollision { .. })
        ));
        assert!(registry.message_type_of::<Impostor>().is_none());
    }

    #[derive(Serialize, Deserialize)]
    struct Reflect;

    impl Message for Reflect {}
    impl Request for Reflect {
        type Response = Reflect;
    }

    #[derive(Serialize, Deserialize)]
    struct Lookalike;

    impl Message for Lookalike {
        fn message_name() -> Cow<'static, str> {
            Quote::message_name()
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Quote;

    impl Message for Quote {}
    impl Request for Quote {
        type Response = Lookalike;
    }

    #[test]
    fn test_request_answering_itself_registers_nothing() {
        let mut registry = TypeRegistry::new();

        let result = registry.register_request::<Reflect>();

        assert!(matches!(
            result,
            Err(RegistrationError::ConflictingMessageType { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_response_colliding_with_its_request_registers_nothing() {
        let mut registry = TypeRegistry::new();

        let result = registry.register_request::<Quote>();

        assert!(matches!(
            result,
            Err(RegistrationError::MessageTypeIdCollision { .. })
        ));
        assert!(registry.message_type_of::<Lookalike>().is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("alloc::vec::Vec<my_app::orders::Line>"), "Vec<Line>");
        assert_eq!(short_name("i64"), "i64");
        assert_eq!(short_name("a::B<c::D, e::F>"), "B<D, F>");
    }
}
