//! Engine event stream.
//!
//! The engine is headless: it never prints. Subscribers receive typed events
//! through an optional callback; per node, events are totally ordered
//! (`Start` < `Progress`* < `Output`* < `Complete` | `Error`), and a
//! dependency's `Complete` is always observed before any dependent's `Start`.

use crate::planner::Action;
use crate::resource::{ResourceId, StrategyKind};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Event {
    /// A node's action began executing.
    Start { id: ResourceId, action: Action, method: StrategyKind, version: String },
    /// Download progress; `total` is present when Content-Length was known.
    Progress { id: ResourceId, bytes: u64, total: Option<u64> },
    /// One line of subprocess output (stdout or stderr).
    Output { id: ResourceId, line: String },
    /// The node's action finished successfully.
    Complete { id: ResourceId },
    /// The node's action failed; state was not mutated for this node.
    Error { id: ResourceId, message: String },
}

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Cheap clonable fan-out point for engine events.
#[derive(Clone, Default)]
pub struct EventSink {
    handler: Option<EventHandler>,
}

impl EventSink {
    pub fn new(handler: Option<EventHandler>) -> Self {
        Self { handler }
    }

    pub fn emit(&self, event: Event) {
        if let Some(handler) = &self.handler {
            handler(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use std::sync::Mutex;

    #[test]
    fn sink_forwards_to_handler() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink = EventSink::new(Some(Arc::new(move |event: &Event| {
            if let Event::Complete { id } = event {
                seen_clone.lock().unwrap().push(id.qualified());
            }
        })));

        sink.emit(Event::Complete { id: ResourceId::new(ResourceKind::Tool, "gh") });
        assert_eq!(seen.lock().unwrap().as_slice(), ["Tool/gh"]);
    }

    #[test]
    fn empty_sink_is_silent() {
        EventSink::default()
            .emit(Event::Complete { id: ResourceId::new(ResourceKind::Tool, "gh") });
    }
}
