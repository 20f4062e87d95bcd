//! Event registration and dispatch.
//!
//! Maps event names to asynchronous handlers with a delivery mode. The
//! table is owned by its session, written at setup time, and read
//! continuously by the receive loop; a `RwLock` covers the rare
//! registration during an active connection.
//!
//! Reserved events (`connect`, `disconnect`, `pong`, `message`) get
//! their payload adapted before the handler runs: no payload for the
//! first three, UTF-8 text for `message`. The adaptation is a pure
//! match over a tagged variant, resolved from the name once per frame.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use crate::chunk::SpooledPayload;

/// Default streaming threshold: payloads over this many bytes spool to
/// temporary storage instead of memory.
pub const DEFAULT_STREAM_THRESHOLD: u64 = 256 * 1024 * 1024;

/// How a payload is materialized before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Decrypted fully into memory.
    #[default]
    Buffered,
    /// Decrypted incrementally into backing temporary storage.
    Streamed,
}

/// The adapted argument a handler receives.
#[derive(Debug)]
pub enum EventData {
    /// Reserved lifecycle events carry no payload.
    Empty,
    /// `message` payloads are delivered as text.
    Text(String),
    /// Buffered payload bytes (zero padding included).
    Bytes(Vec<u8>),
    /// Streamed payload handle.
    Spooled(SpooledPayload),
}

/// Reserved event names with special payload adaptation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReservedEvent {
    Connect,
    Disconnect,
    Pong,
    Message,
    Named,
}

impl ReservedEvent {
    fn classify(name: &str) -> Self {
        match name {
            "connect" => Self::Connect,
            "disconnect" => Self::Disconnect,
            "pong" => Self::Pong,
            "message" => Self::Message,
            _ => Self::Named,
        }
    }

    /// Adapt a decoded payload to the handler argument shape.
    fn adapt(self, payload: EventData) -> EventData {
        match self {
            Self::Connect | Self::Disconnect | Self::Pong => EventData::Empty,
            Self::Message => match payload {
                EventData::Bytes(bytes) => {
                    EventData::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                other => other,
            },
            Self::Named => payload,
        }
    }
}

/// Boxed handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A registered event handler.
pub type Handler = Arc<dyn Fn(EventData) -> HandlerFuture + Send + Sync>;

struct Registration {
    handler: Handler,
    mode: DeliveryMode,
}

/// Event name to (handler, delivery mode) mapping with reserved-event
/// adaptation and a default no-op fallback.
pub struct EventRouter {
    table: RwLock<HashMap<String, Registration>>,
    stream_threshold: u64,
}

impl EventRouter {
    /// Empty router with the given streaming threshold for events that
    /// have no explicit registration.
    pub fn new(stream_threshold: u64) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            stream_threshold,
        }
    }

    /// Register (or overwrite) a handler for `name`.
    pub fn register<F, Fut>(&self, name: &str, mode: DeliveryMode, handler: F)
    where
        F: Fn(EventData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(event = %name, ?mode, "registering event handler");
        let handler: Handler = Arc::new(move |data| Box::pin(handler(data)));
        if let Ok(mut table) = self.table.write() {
            table.insert(name.to_string(), Registration { handler, mode });
        }
    }

    /// Register a buffered handler (the common case).
    pub fn on<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(EventData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(name, DeliveryMode::Buffered, handler);
    }

    /// Resolve the handler and delivery mode for an inbound frame.
    ///
    /// Unregistered names get a no-op handler; their mode is chosen by
    /// comparing the declared payload length against the threshold.
    pub fn resolve(&self, name: &str, declared_len: u64) -> (Handler, DeliveryMode) {
        if let Ok(table) = self.table.read() {
            if let Some(reg) = table.get(name) {
                return (Arc::clone(&reg.handler), reg.mode);
            }
        }

        let mode = if declared_len > self.stream_threshold {
            DeliveryMode::Streamed
        } else {
            DeliveryMode::Buffered
        };
        let noop: Handler = Arc::new(|_| Box::pin(async {}));
        (noop, mode)
    }

    /// Adapt a decoded payload for the named event.
    pub fn adapt(name: &str, payload: EventData) -> EventData {
        ReservedEvent::classify(name).adapt(payload)
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.table.read().map(|t| t.len()).unwrap_or(0);
        f.debug_struct("EventRouter")
            .field("registered", &len)
            .field("stream_threshold", &self.stream_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn registered_handler_runs() {
        let router = EventRouter::new(DEFAULT_STREAM_THRESHOLD);
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        router.on("view", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (handler, mode) = router.resolve("view", 100);
        assert_eq!(mode, DeliveryMode::Buffered);
        handler(EventData::Bytes(vec![1, 2, 3])).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_event_is_noop_with_threshold_mode() {
        let router = EventRouter::new(1024);

        let (handler, mode) = router.resolve("mystery", 100);
        assert_eq!(mode, DeliveryMode::Buffered);
        handler(EventData::Empty).await;

        let (_, mode) = router.resolve("mystery", 4096);
        assert_eq!(mode, DeliveryMode::Streamed);

        // Boundary: at the threshold stays buffered.
        let (_, mode) = router.resolve("mystery", 1024);
        assert_eq!(mode, DeliveryMode::Buffered);
    }

    #[test]
    fn reserved_events_adapt_payloads() {
        for name in ["connect", "disconnect", "pong"] {
            let adapted = EventRouter::adapt(name, EventData::Bytes(vec![1, 2]));
            assert!(matches!(adapted, EventData::Empty), "{name}");
        }

        let adapted = EventRouter::adapt("message", EventData::Bytes(b"hello".to_vec()));
        match adapted {
            EventData::Text(text) => assert_eq!(text, "hello"),
            other => panic!("expected text, got {other:?}"),
        }

        let adapted = EventRouter::adapt("view", EventData::Bytes(vec![9]));
        assert!(matches!(adapted, EventData::Bytes(_)));
    }

    #[test]
    fn registration_overwrites() {
        let router = EventRouter::new(DEFAULT_STREAM_THRESHOLD);
        router.register("file_edit", DeliveryMode::Buffered, |_| async {});
        router.register("file_edit", DeliveryMode::Streamed, |_| async {});

        let (_, mode) = router.resolve("file_edit", 0);
        assert_eq!(mode, DeliveryMode::Streamed);
    }
}
