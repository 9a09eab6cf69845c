//! Message relay between the page and the inference engine's worker.
//!
//! The relay does not look inside messages. It owns the receiving end of a
//! channel and hands every message to an injected [`EngineHandler`] in the
//! order received, until every sender is dropped.

use serde_json::Value;
use tokio::sync::mpsc;

/// Receives raw messages on the engine side.
pub trait EngineHandler: Send {
    fn on_message(&mut self, message: Value);
}

impl<F> EngineHandler for F
where
    F: FnMut(Value) + Send,
{
    fn on_message(&mut self, message: Value) {
        self(message);
    }
}

/// Forwards messages from a channel to a handler.
pub struct MessageRelay<H: EngineHandler> {
    rx: mpsc::UnboundedReceiver<Value>,
    handler: H,
}

impl<H: EngineHandler> MessageRelay<H> {
    /// Creates a relay and the sender the page posts messages through.
    #[must_use]
    pub fn new(handler: H) -> (mpsc::UnboundedSender<Value>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx, handler })
    }

    /// Runs until all senders are dropped. Returns the handler and the
    /// number of messages forwarded.
    pub async fn run(mut self) -> (H, usize) {
        let mut forwarded = 0;
        while let Some(message) = self.rx.recv().await {
            self.handler.on_message(message);
            forwarded += 1;
        }
        log::debug!("Relay closed after {forwarded} message(s)");
        (self.handler, forwarded)
    }
}
