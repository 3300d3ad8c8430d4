//! Subscription descriptors and topic multiplexing
//!
//! A subscription is either one channel on its own socket or an ordered set
//! of channels sharing a socket. The set gets a stable composite identity and
//! its `addChannel` directives are replayed after every (re)connect.

use crate::ws::connection::EndpointId;
use crate::{Result, StreamError};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Separator used to build the composite key of a topic set
pub const COMPOSITE_SEPARATOR: &str = "/";

/// Hex digits kept from the composite key digest
const IDENTITY_HEX_LEN: usize = 16;

/// Callback receiving decoded payloads
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Callback invoked with the identity once a connection opens
pub type OpenedHook = Arc<dyn Fn(&EndpointId) + Send + Sync>;

/// Channels carried by one physical connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topics {
    /// One channel, identity is the channel name
    Single(String),
    /// Channel set sharing one socket, identity is a digest
    Combined(TopicSet),
}

/// Ordered, non-empty, duplicate-free channel set
///
/// Only buildable through [`TopicSet::new`], so every `Topics::Combined`
/// has passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet(Vec<String>);

impl TopicSet {
    /// # Errors
    /// `StreamError::Config` if the set is empty or holds duplicates.
    pub fn new<I, S>(topics: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        if topics.is_empty() {
            return Err(StreamError::Config("topic set cannot be empty".to_string()));
        }

        let mut seen = HashSet::with_capacity(topics.len());
        for topic in &topics {
            if !seen.insert(topic.as_str()) {
                return Err(StreamError::Config(format!(
                    "topic set cannot contain duplicate elements: {:?}",
                    topic
                )));
            }
        }

        Ok(Self(topics))
    }

    #[inline]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl Topics {
    pub fn single(topic: impl Into<String>) -> Self {
        Topics::Single(topic.into())
    }

    /// Build a multiplexed topic set
    ///
    /// # Errors
    /// `StreamError::Config` if the set is empty or holds duplicates.
    pub fn combined<I, S>(topics: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TopicSet::new(topics).map(Topics::Combined)
    }

    /// Canonical key: the channel itself, or the set joined in order
    pub fn composite_key(&self) -> String {
        match self {
            Topics::Single(topic) => topic.clone(),
            Topics::Combined(topics) => topics.as_slice().join(COMPOSITE_SEPARATOR),
        }
    }

    /// Identity of the connection carrying these topics
    pub fn endpoint_id(&self) -> EndpointId {
        match self {
            Topics::Single(topic) => EndpointId::new(topic.as_str()),
            Topics::Combined(_) => EndpointId::new(composite_identity(&self.composite_key())),
        }
    }

    /// Constituent channels of a multiplexed connection
    pub fn streams(&self) -> Option<&[String]> {
        match self {
            Topics::Single(_) => None,
            Topics::Combined(topics) => Some(topics.as_slice()),
        }
    }

    /// Every channel in subscribe order
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        let topics: &[String] = match self {
            Topics::Single(topic) => std::slice::from_ref(topic),
            Topics::Combined(topics) => topics.as_slice(),
        };
        topics.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        match self {
            Topics::Single(_) => 1,
            Topics::Combined(topics) => topics.as_slice().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text frame subscribing every channel
    ///
    /// A single channel sends one object, a topic set sends one array with an
    /// object per channel, in order.
    pub fn add_channel_frame(&self) -> String {
        let frame = match self {
            Topics::Single(topic) => serde_json::to_string(&AddChannel::new(topic)),
            Topics::Combined(topics) => {
                let channels: Vec<AddChannel<'_>> =
                    topics.as_slice().iter().map(|t| AddChannel::new(t)).collect();
                serde_json::to_string(&channels)
            }
        };
        // Serializing plain string fields cannot fail
        frame.unwrap_or_default()
    }
}

/// Derive a short stable identity from a composite key
pub fn composite_identity(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(IDENTITY_HEX_LEN);
    id
}

/// `addChannel` directive
#[derive(Debug, Serialize)]
struct AddChannel<'a> {
    event: &'static str,
    channel: &'a str,
}

impl<'a> AddChannel<'a> {
    fn new(channel: &'a str) -> Self {
        Self {
            event: "addChannel",
            channel,
        }
    }
}

/// What to do once a connection reports open
#[derive(Clone)]
pub enum OpenedAction {
    /// Replay `addChannel` for every constituent channel
    AddChannels,
    /// Hand the identity to a caller hook
    Notify(OpenedHook),
}

impl fmt::Debug for OpenedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenedAction::AddChannels => f.write_str("AddChannels"),
            OpenedAction::Notify(_) => f.write_str("Notify(..)"),
        }
    }
}

/// Subscribe parameters, kept on the connection as its reconnect descriptor
#[derive(Clone)]
pub struct SubscribeRequest {
    topics: Topics,
    handler: MessageHandler,
    reconnect: bool,
    on_opened: Option<OpenedAction>,
    /// Consecutive attempts that closed before ever opening
    failed_attempts: u32,
}

impl SubscribeRequest {
    /// New request without reconnect and without an opened action
    pub fn new(topics: Topics, handler: MessageHandler) -> Self {
        Self {
            topics,
            handler,
            reconnect: false,
            on_opened: None,
            failed_attempts: 0,
        }
    }

    /// Recreate the connection when it closes
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn on_opened(mut self, action: OpenedAction) -> Self {
        self.on_opened = Some(action);
        self
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn handler(&self) -> &MessageHandler {
        &self.handler
    }

    pub fn wants_reconnect(&self) -> bool {
        self.reconnect
    }

    pub fn opened_action(&self) -> Option<&OpenedAction> {
        self.on_opened.as_ref()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Descriptor for the replacement connection
    ///
    /// `opened` tells whether the closing connection ever reached open; only
    /// attempts that never did count towards the backoff.
    pub fn next_attempt(mut self, opened: bool) -> Self {
        self.failed_attempts = if opened {
            0
        } else {
            self.failed_attempts.saturating_add(1)
        };
        self
    }

    /// Delay before connecting, exponential in consecutive failed attempts
    pub fn backoff(&self, base: Duration, max: Duration) -> Duration {
        if self.failed_attempts == 0 {
            return Duration::ZERO;
        }
        let shift = (self.failed_attempts - 1).min(16);
        std::cmp::min(base.saturating_mul(1u32 << shift), max)
    }
}

impl fmt::Debug for SubscribeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeRequest")
            .field("topics", &self.topics)
            .field("reconnect", &self.reconnect)
            .field("on_opened", &self.on_opened)
            .field("failed_attempts", &self.failed_attempts)
            .finish()
    }
}
