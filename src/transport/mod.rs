//! Point-to-point delivery between named endpoints.
//!
//! Delivery is reliable and FIFO per sender/receiver pair. Two substrates are
//! provided: a single shared queue for the deterministic discrete-event
//! driver, and one tokio channel per endpoint for the actor driver.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{IeposError, Result};
use crate::message::{Envelope, Message};
use crate::topology::Address;

/// Outbound side of a peer (or the broker)
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Address messages sent through this transport originate from
    fn local_address(&self) -> Address;

    fn send(&self, to: Address, message: Message) -> Result<()>;
}

/// All endpoints share one FIFO queue; the driver pops and dispatches
#[derive(Debug, Clone)]
pub struct QueueTransport {
    from: Address,
    queue: mpsc::UnboundedSender<Envelope>,
}

impl QueueTransport {
    pub fn new(from: Address, queue: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { from, queue }
    }
}

impl Transport for QueueTransport {
    fn local_address(&self) -> Address {
        self.from
    }

    fn send(&self, to: Address, message: Message) -> Result<()> {
        self.queue
            .send(Envelope::new(self.from, to, message))
            .map_err(|_| IeposError::Internal("message queue closed".into()))
    }
}

/// Inbox senders of every endpoint
pub type Routes = Arc<HashMap<Address, mpsc::UnboundedSender<Envelope>>>;

/// Each endpoint owns an inbox channel
#[derive(Debug, Clone)]
pub struct RoutedTransport {
    from: Address,
    routes: Routes,
}

impl RoutedTransport {
    pub fn new(from: Address, routes: Routes) -> Self {
        Self { from, routes }
    }
}

impl Transport for RoutedTransport {
    fn local_address(&self) -> Address {
        self.from
    }

    fn send(&self, to: Address, message: Message) -> Result<()> {
        let inbox = self
            .routes
            .get(&to)
            .ok_or_else(|| IeposError::Internal(format!("no route to {to}")))?;
        inbox
            .send(Envelope::new(self.from, to, message))
            .map_err(|_| IeposError::Internal(format!("inbox of {to} closed")))
    }
}
