use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{Address, PeerDescriptor, Topology, TopologyGenerator};
use crate::error::{IeposError, Result};
use crate::message::Message;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Init,
    GatheringPeers,
    /// Topology is being (re)generated
    Waiting,
    Completed,
}

impl fmt::Display for BrokerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerState::Init => write!(f, "INIT"),
            BrokerState::GatheringPeers => write!(f, "GATHERING_PEERS"),
            BrokerState::Waiting => write!(f, "WAITING"),
            BrokerState::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Central tree server.
///
/// Gathers exactly `expected_peers` distinct peers, generates a tree,
/// broadcasts every peer's view and then reshuffles, so the views it hands
/// out on the next round of requests describe a different tree. Every
/// `expected_peers`-th reply triggers another reshuffle.
pub struct TopologyBroker {
    expected_peers: usize,
    /// Registered peers, in registration order until the first shuffle
    peers: Vec<PeerDescriptor>,
    generator: TopologyGenerator,
    rng: StdRng,
    state: BrokerState,
    topology: Option<Topology>,
    replies_since_shuffle: usize,
    num_shuffles: usize,
    transport: Arc<dyn Transport>,
}

impl TopologyBroker {
    pub fn new(
        expected_peers: usize,
        generator: TopologyGenerator,
        reorganization_seed: u64,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            expected_peers,
            peers: Vec::with_capacity(expected_peers),
            generator,
            rng: StdRng::seed_from_u64(reorganization_seed),
            state: BrokerState::Init,
            topology: None,
            replies_since_shuffle: 0,
            num_shuffles: 0,
            transport,
        }
    }

    pub fn state(&self) -> BrokerState {
        self.state
    }

    pub fn peers(&self) -> &[PeerDescriptor] {
        &self.peers
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }

    pub fn num_shuffles(&self) -> usize {
        self.num_shuffles
    }

    /// Begin accepting registrations
    pub fn start(&mut self) {
        if self.state == BrokerState::Init {
            self.state = BrokerState::GatheringPeers;
            info!("Topology broker waiting for {} peers", self.expected_peers);
        }
    }

    /// Dispatch an inbound message
    pub fn on_message(&mut self, from: Address, message: Message) -> Result<()> {
        match message {
            Message::ViewRequest(descriptor) => match self.state {
                BrokerState::GatheringPeers => self.register_peer(descriptor),
                _ => self.handle_view_request(&descriptor),
            },
            Message::Stop => Ok(()),
            other => {
                error!("Broker received unexpected {} from {}", other, from);
                Ok(())
            }
        }
    }

    /// Register a peer. Once `expected_peers` distinct peers are known the
    /// topology is generated and broadcast.
    pub fn register_peer(&mut self, descriptor: PeerDescriptor) -> Result<()> {
        if self.state != BrokerState::GatheringPeers {
            error!(
                "Registration of {} rejected in state {}",
                descriptor.id, self.state
            );
            return Ok(());
        }
        if self.peers.contains(&descriptor) {
            debug!("Peer {} already registered", descriptor.id);
            return Ok(());
        }

        self.peers.push(descriptor);
        debug!(
            "Registered peer {}/{}",
            self.peers.len(),
            self.expected_peers
        );

        if self.peers.len() == self.expected_peers {
            self.state = BrokerState::Waiting;
            self.topology = Some(self.generate()?);
            self.broadcast_views()?;
            self.state = BrokerState::Completed;
            info!("Initial topology of {} peers broadcast", self.peers.len());
            self.shuffle()?;
            self.replies_since_shuffle = 0;
        }
        Ok(())
    }

    /// Send every registered peer its current view
    pub fn broadcast_views(&self) -> Result<()> {
        let Some(topology) = self.topology.as_ref() else {
            error!("No topology to broadcast");
            return Err(IeposError::Topology("no topology mapping to broadcast".into()));
        };
        for peer in &self.peers {
            let view = topology.view(peer.id).ok_or_else(|| {
                error!("Topology has no view for {}", peer.id);
                IeposError::Topology(format!("no view generated for {}", peer.id))
            })?;
            self.transport
                .send(Address::Peer(peer.id), Message::ViewReply(view.clone()))?;
        }
        Ok(())
    }

    /// Reply to a peer that asks for its view after the initial broadcast
    pub fn handle_view_request(&mut self, sender: &PeerDescriptor) -> Result<()> {
        if self.state != BrokerState::Completed {
            error!(
                "View request from {} ignored in state {}",
                sender.id, self.state
            );
            return Ok(());
        }
        let view = match self.topology.as_ref().and_then(|t| t.view(sender.id)) {
            Some(view) if self.peers.contains(sender) => view.clone(),
            _ => {
                error!("View request from unknown peer {}", sender.id);
                return Ok(());
            }
        };

        self.transport
            .send(Address::Peer(sender.id), Message::ViewReply(view))?;
        self.replies_since_shuffle += 1;

        if self.replies_since_shuffle == self.expected_peers {
            self.shuffle()?;
            self.replies_since_shuffle = 0;
        }
        Ok(())
    }

    /// Permute the peer set, re-rank peers by their new position and
    /// regenerate the tree
    pub fn shuffle(&mut self) -> Result<()> {
        self.state = BrokerState::Waiting;
        self.peers.shuffle(&mut self.rng);
        for (i, peer) in self.peers.iter_mut().enumerate() {
            peer.rank = i as f64;
        }
        self.topology = Some(self.generate()?);
        self.num_shuffles += 1;
        self.state = BrokerState::Completed;
        debug!("Topology reshuffled ({} so far)", self.num_shuffles);
        Ok(())
    }

    fn generate(&self) -> Result<Topology> {
        self.generator.generate(&self.peers).map_err(|e| {
            error!("Topology generation failed: {}", e);
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{PeerId, TreeView};
    use crate::transport::MockTransport;
    use std::sync::Mutex;

    /// Transport that records everything it is asked to send
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Address, Message)>>,
    }

    impl Transport for Recorder {
        fn local_address(&self) -> Address {
            Address::Broker
        }

        fn send(&self, to: Address, message: Message) -> Result<()> {
            self.sent.lock().unwrap().push((to, message));
            Ok(())
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<(Address, Message)> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    fn descriptor(i: usize) -> PeerDescriptor {
        PeerDescriptor::new(PeerId(i), i as f64, 2)
    }

    fn broker(n: usize) -> (TopologyBroker, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let mut broker = TopologyBroker::new(n, TopologyGenerator::default(), 0, recorder.clone());
        broker.start();
        (broker, recorder)
    }

    fn reply_view(message: &Message) -> &TreeView {
        match message {
            Message::ViewReply(view) => view,
            other => panic!("expected view reply, got {other}"),
        }
    }

    #[test]
    fn test_broadcast_after_all_peers_registered() {
        let (mut broker, recorder) = broker(3);
        assert_eq!(broker.state(), BrokerState::GatheringPeers);

        broker.register_peer(descriptor(0)).unwrap();
        broker.register_peer(descriptor(1)).unwrap();
        // duplicates do not count
        broker.register_peer(descriptor(1)).unwrap();
        assert!(recorder.take().is_empty());

        broker.register_peer(descriptor(2)).unwrap();
        let sent = recorder.take();
        assert_eq!(sent.len(), 3);
        let roots = sent.iter().filter(|(_, m)| reply_view(m).is_root()).count();
        assert_eq!(roots, 1);

        // the broker reshuffles right after the initial broadcast
        assert_eq!(broker.state(), BrokerState::Completed);
        assert_eq!(broker.num_shuffles(), 1);
        let ranks: Vec<f64> = broker.peers().iter().map(|p| p.rank).collect();
        assert_eq!(ranks, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_every_nth_reply_triggers_shuffle() {
        let (mut broker, recorder) = broker(2);
        broker.register_peer(descriptor(0)).unwrap();
        broker.register_peer(descriptor(1)).unwrap();
        recorder.take();

        broker.handle_view_request(&descriptor(0)).unwrap();
        assert_eq!(broker.num_shuffles(), 1);
        broker.handle_view_request(&descriptor(1)).unwrap();
        assert_eq!(broker.num_shuffles(), 2);
        assert_eq!(recorder.take().len(), 2);
    }

    #[test]
    fn test_replies_come_from_one_consistent_tree() {
        let (mut broker, recorder) = broker(5);
        for i in 0..5 {
            broker.register_peer(descriptor(i)).unwrap();
        }
        recorder.take();
        let expected = broker.topology().unwrap().clone();

        for i in 0..5 {
            broker.on_message(Address::Peer(PeerId(i)), Message::ViewRequest(descriptor(i))).unwrap();
        }
        for (to, message) in recorder.take() {
            let Address::Peer(id) = to else { panic!("reply to broker") };
            assert_eq!(reply_view(&message), expected.view(id).unwrap());
        }
    }

    #[test]
    fn test_invalid_requests_are_ignored() {
        let (mut broker, recorder) = broker(2);
        // not completed yet
        broker.handle_view_request(&descriptor(0)).unwrap();
        broker.register_peer(descriptor(0)).unwrap();
        broker.register_peer(descriptor(1)).unwrap();
        recorder.take();

        // unknown sender
        broker.handle_view_request(&descriptor(7)).unwrap();
        assert!(recorder.take().is_empty());

        // registration after gathering is over
        broker.register_peer(descriptor(5)).unwrap();
        assert_eq!(broker.peers().len(), 2);
    }

    #[test]
    fn test_shuffle_of_single_peer_is_noop() {
        let (mut broker, recorder) = broker(1);
        broker.register_peer(descriptor(0)).unwrap();
        let before = broker.topology().unwrap().clone();
        broker.shuffle().unwrap();

        assert_eq!(broker.topology().unwrap(), &before);
        let view = before.view(PeerId(0)).unwrap();
        assert!(view.parent.is_none() && view.children.is_empty());
        assert_eq!(recorder.take().len(), 1);
    }

    #[test]
    fn test_broadcast_without_topology_is_fatal() {
        let (broker, _) = broker(2);
        assert!(matches!(broker.broadcast_views(), Err(IeposError::Topology(_))));
    }

    #[test]
    fn test_transport_failure_propagates() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_, _| Err(IeposError::Internal("down".into())));
        let mut broker = TopologyBroker::new(1, TopologyGenerator::default(), 0, Arc::new(transport));
        broker.start();
        assert!(broker.register_peer(descriptor(0)).is_err());
    }
}
