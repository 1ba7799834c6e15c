//! Typed publish-subscribe contract for process lifecycle events.
//!
//! Each handle owns one [`EventHub`]; observers register with
//! [`EventHub::subscribe`] and receive every event emitted after
//! registration. `Exit`, `Close` and `Disconnect` fire at most once per
//! handle; `Close` fires strictly after `Exit` and after every stdio
//! stream has signaled end-of-stream.

use parking_lot::Mutex;
use spawnkit_common::{ChannelError, Signal};
use spawnkit_ipc::IpcMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle event of a launched process.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// The process terminated. Exactly one of `code`/`signal` is set.
    Exit {
        code: Option<i32>,
        signal: Option<Signal>,
    },
    /// The process terminated and every stdio stream has drained.
    /// Always follows `Exit`.
    Close {
        code: Option<i32>,
        signal: Option<Signal>,
    },
    /// The IPC channel reached its terminal disconnected state.
    Disconnect,
    /// A structured message arrived on the IPC channel.
    Message(Arc<IpcMessage>),
    /// A communication fault that does not end the process lifecycle.
    Error(ChannelError),
}

/// Observer registry delivering events in emission order.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ProcessEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Events emitted before registration are not
    /// replayed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProcessEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver an event to every live observer, dropping the ones that
    /// went away.
    pub fn emit(&self, event: ProcessEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_events_in_order() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();

        hub.emit(ProcessEvent::Exit {
            code: Some(0),
            signal: None,
        });
        hub.emit(ProcessEvent::Close {
            code: Some(0),
            signal: None,
        });

        assert!(matches!(
            rx.recv().await,
            Some(ProcessEvent::Exit { code: Some(0), .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ProcessEvent::Close { code: Some(0), .. })
        ));
    }

    #[tokio::test]
    async fn test_dead_subscriber_is_dropped() {
        let hub = EventHub::new();
        let rx = hub.subscribe();
        drop(rx);

        hub.emit(ProcessEvent::Disconnect);
        assert!(hub.subscribers.lock().is_empty());
    }
}
