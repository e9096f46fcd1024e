//! Wire messages exchanged between peers and the topology broker.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::{DiscomfortStats, Vector};
use crate::topology::{Address, PeerDescriptor, TreeView};

/// Bottom-up contribution of a subtree for one iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpMessage {
    pub iteration: usize,
    pub subtree_response: Vector,
    pub discomfort: DiscomfortStats,
    /// Number of agents in the sender's subtree
    pub subtree_size: usize,
}

/// Top-down broadcast of the iteration's outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownMessage {
    pub iteration: usize,
    pub global_response: Vector,
    pub global_discomfort: DiscomfortStats,
    /// Whether the parent accepted this child's new subtree contribution
    pub approved: bool,
    pub num_agents: usize,
    /// Reorganize the tree once this iteration's down phase is over
    pub reorganize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Peer asks the broker for its (new) position in the tree
    ViewRequest(PeerDescriptor),
    /// Broker assigns a position in the tree
    ViewReply(TreeView),
    Up(UpMessage),
    Down(DownMessage),
    /// Runtime asks the receiver to stop processing
    Stop,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ViewRequest(_) => "view_request",
            Message::ViewReply(_) => "view_reply",
            Message::Up(_) => "up",
            Message::Down(_) => "down",
            Message::Stop => "stop",
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Up(up) => write!(f, "up(iteration={})", up.iteration),
            Message::Down(down) => write!(
                f,
                "down(iteration={}, approved={}, reorganize={})",
                down.iteration, down.approved, down.reorganize
            ),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// A message in flight
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub from: Address,
    pub to: Address,
    pub message: Message,
}

impl Envelope {
    pub fn new(from: Address, to: Address, message: Message) -> Self {
        Self { from, to, message }
    }
}
