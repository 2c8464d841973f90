//! Bridge from `tracing` diagnostics to the UI bus.
//!
//! The runtime narrates itself through `tracing`. A frontend already
//! watching the bus should see the diagnostics that matter — denied
//! approvals, failed tools, model trouble — without standing up a whole
//! log pipeline, so [`BusStatusLayer`] forwards log events at warn and
//! above (configurable) as `status` display events.

use crate::ui::bus::{DisplayEvent, EventBus, StatusLevel};
use std::cell::Cell;
use std::sync::Arc;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::Layer;
use tracing_subscriber::registry::LookupSpan;

thread_local! {
    // A bus listener may itself log; while a forward is in flight,
    // nested log events are dropped instead of recursing.
    static FORWARDING: Cell<bool> = const { Cell::new(false) };
}

/// A [`tracing_subscriber::Layer`] that turns log events into `status`
/// display events on the bus.
pub struct BusStatusLayer {
    bus: Arc<EventBus>,
    min_level: Level,
}

impl BusStatusLayer {
    /// Forward warn and error events to the given bus.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            min_level: Level::WARN,
        }
    }

    /// Also forward events below warn, down to `level`.
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for BusStatusLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = *event.metadata().level();
        // Level orders by verbosity: TRACE is greatest, ERROR least.
        if level > self.min_level {
            return;
        }
        if FORWARDING.with(Cell::get) {
            return;
        }

        let mut message = MessageText::default();
        event.record(&mut message);
        let text = message.0;
        if text.is_empty() {
            return;
        }

        let status = if level == Level::ERROR {
            StatusLevel::Error
        } else if level == Level::WARN {
            StatusLevel::Warning
        } else {
            StatusLevel::Info
        };

        FORWARDING.with(|f| f.set(true));
        self.bus.emit_display(&DisplayEvent::Status {
            level: status,
            text,
        });
        FORWARDING.with(|f| f.set(false));
    }
}

/// Captures only the `message` field of a log event; structured fields
/// belong to the log pipeline, not the status line.
#[derive(Default)]
struct MessageText(String);

impl tracing::field::Visit for MessageText {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.0 = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}").trim_matches('"').to_string();
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
