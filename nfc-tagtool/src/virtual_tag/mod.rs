//! In-memory tags
//!
//! Software cards that implement the transport traits and follow the rules
//! a real card enforces. Each one is a cheap handle around shared state, so
//! a clone can be handed to an engine while the original inspects what the
//! engine did.

mod mifare;
mod srix;

pub use mifare::{AuthAttempt, VirtualMifareCard};
pub use srix::VirtualSrixTag;

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::TransportError;
use crate::transport::{MifareTransport, SrixTransport, TransportProvider};

/// Provider handing out virtual tags
///
/// A protocol without a tag fails to open, which the coordinator reports
/// as hardware unavailable.
#[derive(Default, Clone)]
pub struct VirtualReader {
    mifare: Arc<Mutex<Option<VirtualMifareCard>>>,
    srix: Arc<Mutex<Option<VirtualSrixTag>>>,
}

impl VirtualReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mifare(self, card: VirtualMifareCard) -> Self {
        *self.mifare.lock() = Some(card);
        self
    }

    pub fn with_srix(self, tag: VirtualSrixTag) -> Self {
        *self.srix.lock() = Some(tag);
        self
    }
}

impl TransportProvider for VirtualReader {
    fn open_mifare(&self) -> Result<Box<dyn MifareTransport>, TransportError> {
        match self.mifare.lock().as_ref() {
            Some(card) => Ok(Box::new(card.clone())),
            None => Err(TransportError::Handshake("no ISO14443A reader".to_string())),
        }
    }

    fn open_srix(&self) -> Result<Box<dyn SrixTransport>, TransportError> {
        match self.srix.lock().as_ref() {
            Some(tag) => Ok(Box::new(tag.clone())),
            None => Err(TransportError::Handshake("no ISO14443B reader".to_string())),
        }
    }
}
