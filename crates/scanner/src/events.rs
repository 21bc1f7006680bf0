//! Outbound event channels for notification and CLI consumers.

use tokio::sync::mpsc;
use tracing::debug;

use optdesk_core::{ExitEvent, Signal};

/// Producer half, held by the scan loop. Publishing never blocks; if all
/// consumers are gone the event is dropped quietly.
#[derive(Clone)]
pub struct EventBus {
    signals: mpsc::UnboundedSender<Signal>,
    exits: mpsc::UnboundedSender<ExitEvent>,
}

/// Consumer half: append-only streams of signals and exits.
pub struct EventStreams {
    pub signals: mpsc::UnboundedReceiver<Signal>,
    pub exits: mpsc::UnboundedReceiver<ExitEvent>,
}

impl EventBus {
    pub fn new() -> (Self, EventStreams) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        (
            Self {
                signals: signal_tx,
                exits: exit_tx,
            },
            EventStreams {
                signals: signal_rx,
                exits: exit_rx,
            },
        )
    }

    pub fn publish_signal(&self, signal: Signal) {
        if self.signals.send(signal).is_err() {
            debug!("No signal consumers attached");
        }
    }

    pub fn publish_exit(&self, event: ExitEvent) {
        if self.exits.send(event).is_err() {
            debug!("No exit consumers attached");
        }
    }
}
