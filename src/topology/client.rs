use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{Address, PeerDescriptor, TreeView};
use crate::error::Result;
use crate::message::Message;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Init,
    Waiting,
    Completed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Init => write!(f, "INIT"),
            ClientState::Waiting => write!(f, "WAITING"),
            ClientState::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Per-peer side of the topology protocol: asks the broker for a view and
/// hands the reply to the owning agent.
pub struct TopologyClient {
    descriptor: PeerDescriptor,
    state: ClientState,
    num_requests: usize,
    transport: Arc<dyn Transport>,
}

impl TopologyClient {
    pub fn new(descriptor: PeerDescriptor, transport: Arc<dyn Transport>) -> Self {
        Self {
            descriptor,
            state: ClientState::Init,
            num_requests: 0,
            transport,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn descriptor(&self) -> &PeerDescriptor {
        &self.descriptor
    }

    /// Number of views requested so far (initial request included)
    pub fn num_requests(&self) -> usize {
        self.num_requests
    }

    pub fn request_new_tree_view(&mut self) -> Result<()> {
        self.transport
            .send(Address::Broker, Message::ViewRequest(self.descriptor.clone()))?;
        self.state = ClientState::Waiting;
        self.num_requests += 1;
        debug!("{} requested a tree view", self.descriptor.id);
        Ok(())
    }

    /// Accept the broker's reply. A view without parent and children is
    /// still delivered; the agent stalls until it is re-included.
    pub fn on_view(&mut self, view: TreeView) -> TreeView {
        if self.state != ClientState::Waiting {
            warn!(
                "{} received an unsolicited tree view in state {}",
                self.descriptor.id, self.state
            );
        }
        if view.is_disconnected() {
            error!(
                "{} is disconnected: tree view has neither parent nor children",
                self.descriptor.id
            );
        }
        self.state = ClientState::Completed;
        view
    }
}
