//! Channel-backed input source
//!
//! Lets tests (and embedders with their own capture) inject events through
//! an [`InputInjector`] instead of real devices.

use super::{InputEvent, InputSource, EVENT_BUFFER};
use crate::error::InputError;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Handle used to push events into a [`ChannelSource`]
#[derive(Clone, Default)]
pub struct InputInjector {
    tx: Arc<Mutex<Option<mpsc::Sender<InputEvent>>>>,
}

impl InputInjector {
    /// Deliver an event; returns false when the source is not running
    pub async fn send(&self, event: InputEvent) -> bool {
        let tx = self.tx.lock().ok().and_then(|guard| guard.clone());
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.tx.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }
}

/// Input source fed by an [`InputInjector`]
#[derive(Default)]
pub struct ChannelSource {
    injector: InputInjector,
}

impl ChannelSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn injector(&self) -> InputInjector {
        self.injector.clone()
    }
}

#[async_trait::async_trait]
impl InputSource for ChannelSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<InputEvent>, InputError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut guard = self
            .injector
            .tx
            .lock()
            .map_err(|_| InputError::Capture("injector poisoned".to_string()))?;
        *guard = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), InputError> {
        if let Ok(mut guard) = self.injector.tx.lock() {
            guard.take();
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "channel"
    }
}
