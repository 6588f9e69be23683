//! Publish/subscribe primitive shared by every component of the player.
//!
//! Handlers are invoked synchronously, in registration order. A failing
//! handler stops the dispatch and its error is returned to whoever fired the
//! event. Firing takes a snapshot of the handler list before invoking
//! anything, so a handler may subscribe, unsubscribe or fire further events on
//! the same bus without deadlocking.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{markers::Marker, HandlerError, WaveplayError};

/// Events carried by an [`EventBus`] expose the name they are subscribed by.
pub trait Event: Send + Sync + 'static {
    type Kind: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

pub type HandlerResult = std::result::Result<(), HandlerError>;

type Handler<E> = Arc<dyn Fn(&E) -> HandlerResult + Send + Sync>;

/// Token returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Subscription<E: Event> {
    id: HandlerId,
    kind: E::Kind,
    handler: Handler<E>,
}

struct Registry<E: Event> {
    next_id: u64,
    subscriptions: Vec<Subscription<E>>,
}

/// Cloneable handle over a shared handler registry.
pub struct EventBus<E: Event> {
    registry: Arc<RwLock<Registry<E>>>,
}

impl<E: Event> EventBus<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry {
                next_id: 0,
                subscriptions: Vec::new(),
            })),
        }
    }

    /// Registers `handler` for events of `kind`. Several handlers per kind
    /// are allowed.
    pub fn on<F>(&self, kind: E::Kind, handler: F) -> HandlerId
    where
        F: Fn(&E) -> HandlerResult + Send + Sync + 'static,
    {
        let mut registry = self.write();
        let id = HandlerId(registry.next_id);
        registry.next_id += 1;
        registry.subscriptions.push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Removes a handler. Returns `false` when the id was unknown.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut registry = self.write();
        let before = registry.subscriptions.len();
        registry.subscriptions.retain(|sub| sub.id != id);
        registry.subscriptions.len() != before
    }

    /// Invokes every handler registered for the event's kind.
    pub fn fire(&self, event: &E) -> HandlerResult {
        let kind = event.kind();
        let handlers: Vec<Handler<E>> = self
            .read()
            .subscriptions
            .iter()
            .filter(|sub| sub.kind == kind)
            .map(|sub| Arc::clone(&sub.handler))
            .collect();

        for handler in handlers {
            handler(event)?;
        }
        Ok(())
    }

    pub fn handler_count(&self, kind: E::Kind) -> usize {
        self.read()
            .subscriptions
            .iter()
            .filter(|sub| sub.kind == kind)
            .count()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry<E>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry<E>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Event> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.read().subscriptions.len())
            .finish()
    }
}

/// Names of the events emitted by the player controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    Progress,
    Seek,
    Ready,
    Mark,
    Loading,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Progress => "progress",
            Self::Seek => "seek",
            Self::Ready => "ready",
            Self::Mark => "mark",
            Self::Loading => "loading",
            Self::Error => "error",
        }
    }
}

impl FromStr for EventKind {
    type Err = WaveplayError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "click" => Ok(Self::Click),
            "progress" => Ok(Self::Progress),
            "seek" => Ok(Self::Seek),
            "ready" => Ok(Self::Ready),
            "mark" => Ok(Self::Mark),
            "loading" => Ok(Self::Loading),
            "error" => Ok(Self::Error),
            _ => Err(WaveplayError::msg(format!("unknown event `{name}`"))),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payloads emitted by the player controller.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// A click on the waveform, as a fraction of its width.
    Click(f64),
    /// Playback progress in `[0, 1]`, emitted once per update tick while playing.
    Progress(f64),
    /// Emitted after the backend clock has been moved.
    Seek(f64),
    Ready,
    /// Playback crossed a marker.
    Mark(Marker),
    /// Fraction of the source fetched so far.
    Loading(f64),
    /// A source could not be fetched.
    Error { target: String, reason: String },
}

impl Event for PlayerEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            Self::Click(_) => EventKind::Click,
            Self::Progress(_) => EventKind::Progress,
            Self::Seek(_) => EventKind::Seek,
            Self::Ready => EventKind::Ready,
            Self::Mark(_) => EventKind::Mark,
            Self::Loading(_) => EventKind::Loading,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

pub type PlayerEventBus = EventBus<PlayerEvent>;
