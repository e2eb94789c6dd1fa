//! `EventBus`: unbounded multi-producer / multi-consumer FIFO of events.
//!
//! Producers are the worker thread, `ask()` callers and the synthesizer.
//! Consumers pull with a bounded wait; each event is delivered to exactly one
//! consumer, in enqueue order.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::ipc::events::{AssistantEvent, LogLevel};

/// Result of a bounded wait on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(AssistantEvent),
    /// Nothing arrived within the wait; streaming consumers should send a
    /// keepalive to hold their connection open.
    Keepalive,
}

/// Cloneable handle to one shared queue.
#[derive(Clone)]
pub struct EventBus {
    tx: Sender<AssistantEvent>,
    rx: Receiver<AssistantEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Enqueue an event. Never blocks.
    pub fn publish(&self, event: AssistantEvent) {
        // The bus owns a receiver, so the channel can never be disconnected.
        let _ = self.tx.send(event);
    }

    /// Mirror `message` to tracing at the matching level and enqueue it as a
    /// `log` event.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!("{message}"),
            LogLevel::Success => info!(success = true, "{message}"),
            LogLevel::Warning => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        self.publish(AssistantEvent::log(level, message));
    }

    /// Wait up to `wait` for the next event.
    pub fn poll(&self, wait: Duration) -> Delivery {
        match self.rx.recv_timeout(wait) {
            Ok(event) => Delivery::Event(event),
            Err(RecvTimeoutError::Timeout) => Delivery::Keepalive,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("event bus disconnected");
                Delivery::Keepalive
            }
        }
    }

    /// Take the next event without waiting.
    pub fn try_next(&self) -> Option<AssistantEvent> {
        self.rx.try_recv().ok()
    }

    /// Take every event currently queued.
    pub fn drain(&self) -> Vec<AssistantEvent> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Start a streaming subscription: its first delivery is always the
    /// synthetic `connected` event, then real events as they are polled.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            bus: self.clone(),
            greeted: false,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One streaming consumer of the bus.
pub struct EventSubscription {
    bus: EventBus,
    greeted: bool,
}

impl EventSubscription {
    pub fn next(&mut self, wait: Duration) -> Delivery {
        if !self.greeted {
            self.greeted = true;
            return Delivery::Event(AssistantEvent::Connected);
        }
        self.bus.poll(wait)
    }
}
