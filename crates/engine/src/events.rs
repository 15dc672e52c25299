//! Event sink for structured engine events
//!
//! The engine never touches global logger state. Whoever constructs the
//! [`Lcm`](crate::Lcm) hands it an [`EventSink`]; the host typically uses
//! [`LogSink`], which forwards to the `log` facade.

use crate::types::OperationKind;
use log::Level;
use std::sync::Mutex;

/// A structured engine event
#[derive(Debug, Clone)]
pub struct Event {
    pub level: Level,
    /// Source file that emitted the event
    pub file: &'static str,
    /// Source line that emitted the event
    pub line: u32,
    /// Operation the event belongs to, if any
    pub operation: Option<OperationKind>,
    pub message: String,
}

/// Receiver for engine events
///
/// Implement this trait to route events to your own logging backend.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Emit an event with the caller's file and line
///
/// ```ignore
/// emit!(sink, Level::Info, op: Some(OperationKind::ApplyConfiguration), "applied {}", key);
/// emit!(sink, Level::Debug, "loaded provider {}", name);
/// ```
#[macro_export]
macro_rules! emit {
    ($sink:expr, $level:expr, op: $op:expr, $($arg:tt)+) => {
        $crate::events::EventSink::emit(
            $sink,
            $crate::events::Event {
                level: $level,
                file: file!(),
                line: line!(),
                operation: $op,
                message: format!($($arg)+),
            },
        )
    };
    ($sink:expr, $level:expr, $($arg:tt)+) => {
        $crate::emit!($sink, $level, op: None, $($arg)+)
    };
}

/// Forwards events to the `log` facade, keeping file and line
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: Event) {
        let target = match event.operation {
            Some(op) => op.as_str(),
            None => "lcm_engine",
        };

        log::logger().log(
            &log::Record::builder()
                .args(format_args!("{}", event.message))
                .level(event.level)
                .target(target)
                .file(Some(event.file))
                .line(Some(event.line))
                .module_path(Some(module_path!()))
                .build(),
        );
    }
}

/// Discards all events
pub struct NoEvents;

impl EventSink for NoEvents {
    fn emit(&self, _event: Event) {}
}

/// Keeps events in memory
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Messages at or above the given level
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.level <= level)
            .map(|e| e.message)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
