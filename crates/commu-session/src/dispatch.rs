//! Routing decoded messages to application handlers.

use std::collections::HashMap;
use std::fmt;

use commu_protocol::{Message, MessageKind};

use crate::error::SessionError;
use crate::session::SessionState;

type MessageHandler = Box<dyn Fn(&Message) + Send + Sync>;
type ConnectionHandler = Box<dyn Fn(SessionState, Option<&str>) + Send + Sync>;
type ErrorHandler = Box<dyn Fn(&SessionError) + Send + Sync>;

/// Handler table owned by a session.
///
/// Each decoded message is delivered once to every handler registered for
/// its kind, then once to every catch-all handler.
///
/// ```rust
/// use commu_protocol::MessageKind;
/// use commu_session::Dispatcher;
///
/// let dispatcher = Dispatcher::new()
///     .on(MessageKind::Question, |msg| println!("asked: {msg:?}"))
///     .on_connection_change(|state, _| println!("now {state}"));
/// ```
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<MessageKind, Vec<MessageHandler>>,
    catch_all: Vec<MessageHandler>,
    connection: Vec<ConnectionHandler>,
    errors: Vec<ErrorHandler>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .field("catch_all", &self.catch_all.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one message kind.
    pub fn on<F>(mut self, kind: MessageKind, handler: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
        self
    }

    /// Registers a handler for every message.
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.catch_all.push(Box::new(handler));
        self
    }

    /// Registers a handler for session state changes.
    pub fn on_connection_change<F>(mut self, handler: F) -> Self
    where
        F: Fn(SessionState, Option<&str>) + Send + Sync + 'static,
    {
        self.connection.push(Box::new(handler));
        self
    }

    /// Registers a handler for errors not returned to a caller.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SessionError) + Send + Sync + 'static,
    {
        self.errors.push(Box::new(handler));
        self
    }

    /// Delivers a message. Returns how many handlers saw it.
    pub fn dispatch(&self, message: &Message) -> usize {
        let specific = self
            .handlers
            .get(&message.kind())
            .map(Vec::as_slice)
            .unwrap_or_default();
        for handler in specific.iter().chain(&self.catch_all) {
            handler(message);
        }
        specific.len() + self.catch_all.len()
    }

    pub(crate) fn connection_changed(&self, state: SessionState, detail: Option<&str>) {
        for handler in &self.connection {
            handler(state, detail);
        }
    }

    pub(crate) fn error(&self, err: &SessionError) {
        for handler in &self.errors {
            handler(err);
        }
    }
}
