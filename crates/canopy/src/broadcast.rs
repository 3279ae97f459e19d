#![forbid(unsafe_code)]

//! Secondary, type-tagged change channel.
//!
//! Alongside pattern subscriptions, every field write can be announced as a
//! [`BroadcastEvent`] carrying the fully-qualified path and the new value.
//! It is delivered to the typed listeners (`watcher().add_listener`) of the
//! writing node and of each of its ancestors, every one under its own
//! shorter path, and once to every configured [`BroadcastSink`].
//! Broadcasting knows nothing about subscription cancellation.

use std::cell::RefCell;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// A change announced on the broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastEvent {
    /// Type tag (`Settings::event_type`).
    pub event_type: String,
    /// Fully-qualified path of the written field.
    pub path: String,
    /// Name of the written field in its holder.
    pub property: String,
    /// Plain snapshot of the new value.
    pub value: Value,
}

/// Receiver of broadcast events.
pub trait BroadcastSink: fmt::Debug {
    fn dispatch(&self, event: &BroadcastEvent);
}

/// Shared handle to a sink.
pub type SinkRef = Rc<dyn BroadcastSink>;

/// A typed listener callback.
pub type Listener = Rc<dyn Fn(&BroadcastEvent)>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by `add_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Typed listeners of one node.
#[derive(Default)]
pub struct Listeners {
    entries: Vec<(ListenerId, String, Listener)>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(id, kind, _)| (id, kind)))
            .finish()
    }
}

impl Listeners {
    pub fn add(&mut self, event_type: impl Into<String>, listener: Listener) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.entries.push((id, event_type.into(), listener));
        id
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _, _)| *existing != id);
        self.entries.len() != before
    }

    /// Listeners for `event_type`, in registration order.
    #[must_use]
    pub fn matching(&self, event_type: &str) -> Vec<Listener> {
        self.entries
            .iter()
            .filter(|(_, kind, _)| kind == event_type)
            .map(|(_, _, listener)| Rc::clone(listener))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deliver `event` to `listeners`, then to each sink, in order.
pub(crate) fn deliver(event: &BroadcastEvent, listeners: &[Listener], sinks: &[SinkRef]) {
    for listener in listeners {
        listener(event);
    }
    for sink in sinks {
        sink.dispatch(event);
    }
}

/// Sink writing one JSON object per line.
///
/// Write failures are logged and dropped; broadcasting is best-effort.
pub struct JsonlSink {
    writer: RefCell<BufWriter<Box<dyn Write>>>,
    flush_on_write: bool,
}

impl fmt::Debug for JsonlSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonlSink")
            .field("flush_on_write", &self.flush_on_write)
            .finish_non_exhaustive()
    }
}

impl JsonlSink {
    /// Wrap any writer. Flushes after every line by default.
    #[must_use]
    pub fn new(writer: impl Write + 'static) -> Self {
        Self {
            writer: RefCell::new(BufWriter::new(Box::new(writer))),
            flush_on_write: true,
        }
    }

    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Append to the file at `path`, creating it if needed.
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }

    #[must_use]
    pub fn with_flush_on_write(mut self, enabled: bool) -> Self {
        self.flush_on_write = enabled;
        self
    }

    /// Flush buffered lines.
    pub fn flush(&self) -> io::Result<()> {
        self.writer.borrow_mut().flush()
    }

    fn write_event(&self, event: &BroadcastEvent) -> io::Result<()> {
        let line = serde_json::to_string(event)?;
        let mut writer = self.writer.borrow_mut();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        if self.flush_on_write {
            writer.flush()?;
        }
        Ok(())
    }
}

impl BroadcastSink for JsonlSink {
    fn dispatch(&self, event: &BroadcastEvent) {
        if let Err(err) = self.write_event(event) {
            warn!(path = %event.path, error = %err, "broadcast sink write failed");
        }
    }
}
