//! Message: the application-level unit, built via a fluent builder.
//!
//! A message pairs a stream id (`sid`) and an event name with an [`Entity`]
//! payload. The sid correlates a request/subscribe with its replies and is
//! assigned at send time; replies copy it from the originating message.
//! Once built, `sid` / `event` / entity are fixed.

use crate::entity::Entity;
use crate::frame::Flag;

/// An immutable application message.
///
/// # Examples
///
/// ```
/// use socketd_core::entity::Entity;
/// use socketd_core::frame::Flag;
/// use socketd_core::message::MessageBuilder;
///
/// let msg = MessageBuilder::new()
///     .flag(Flag::Request)
///     .sid("s-1")
///     .event("echo")
///     .entity(Entity::of_text("hi"))
///     .build();
/// assert!(msg.is_request());
/// assert_eq!(msg.entity().data_as_string(), "hi");
/// ```
#[derive(Debug, Clone)]
pub struct Message {
    flag: Flag,
    sid: String,
    event: String,
    entity: Entity,
}

impl Message {
    #[must_use]
    pub const fn flag(&self) -> Flag {
        self.flag
    }

    /// The stream id (correlates request/subscribe with replies, and the
    /// fragments of one entity).
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// The event name (empty on replies).
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    #[must_use]
    pub const fn entity(&self) -> &Entity {
        &self.entity
    }

    #[must_use]
    pub fn into_entity(self) -> Entity {
        self.entity
    }

    #[must_use]
    pub const fn is_request(&self) -> bool {
        matches!(self.flag, Flag::Request)
    }

    #[must_use]
    pub const fn is_subscribe(&self) -> bool {
        matches!(self.flag, Flag::Subscribe)
    }

    /// End-of-stream marker (final reply of a subscription).
    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self.flag, Flag::ReplyEnd)
    }

    // Entity passthrough, for call-site convenience.

    #[must_use]
    pub fn meta(&self, name: &str) -> Option<&str> {
        self.entity.meta(name)
    }

    #[must_use]
    pub fn meta_as_int(&self, name: &str) -> i64 {
        self.entity.meta_as_int(name)
    }

    #[must_use]
    pub fn data_size(&self) -> usize {
        self.entity.data_size()
    }
}

/// Mutable builder assembling `flag, sid, event, entity` into a [`Message`].
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    flag: Option<Flag>,
    sid: String,
    event: String,
    entity: Entity,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn flag(mut self, flag: Flag) -> Self {
        self.flag = Some(flag);
        self
    }

    #[must_use]
    pub fn sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = sid.into();
        self
    }

    #[must_use]
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    #[must_use]
    pub fn entity(mut self, entity: Entity) -> Self {
        self.entity = entity;
        self
    }

    /// Consume the builder; missing flags default to [`Flag::Message`].
    #[must_use]
    pub fn build(self) -> Message {
        Message {
            flag: self.flag.unwrap_or(Flag::Message),
            sid: self.sid,
            event: self.event,
            entity: self.entity,
        }
    }
}
