use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::RunSetup;
use crate::agent::{Agent, AgentPhase};
use crate::error::{IeposError, Result};
use crate::message::{Envelope, Message};
use crate::topology::{Address, PeerId};
use crate::transport::{RoutedTransport, Routes};

/// One tokio task per agent plus one for the broker, each owning an inbox
/// and handling one message at a time
pub struct ActorRuntime {
    setup: RunSetup,
    timeout: Duration,
}

impl ActorRuntime {
    pub fn new(setup: RunSetup, timeout: Duration) -> Self {
        Self { setup, timeout }
    }

    /// Run every agent to completion and hand them back, ordered by id
    pub async fn run(self) -> Result<Vec<Agent>> {
        self.setup.validate()?;
        let num_agents = self.setup.num_agents();
        let mut senders = HashMap::with_capacity(num_agents + 1);
        let mut inboxes = HashMap::with_capacity(num_agents + 1);
        for address in std::iter::once(Address::Broker)
            .chain((0..num_agents).map(|i| Address::Peer(PeerId(i))))
        {
            let (tx, rx) = mpsc::unbounded_channel::<Envelope>();
            senders.insert(address, tx);
            inboxes.insert(address, rx);
        }
        let routes: Routes = Arc::new(senders);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Result<PeerId>>();

        let mut broker = self
            .setup
            .broker(Arc::new(RoutedTransport::new(Address::Broker, routes.clone())));
        let mut broker_inbox = inboxes
            .remove(&Address::Broker)
            .ok_or_else(|| IeposError::Internal("broker inbox missing".into()))?;
        broker.start();
        let broker_task = tokio::spawn(async move {
            while let Some(Envelope { from, message, .. }) = broker_inbox.recv().await {
                if message == Message::Stop {
                    break;
                }
                broker.on_message(from, message)?;
            }
            Ok::<_, IeposError>(broker)
        });

        let mut agent_tasks: Vec<JoinHandle<Result<Agent>>> = Vec::with_capacity(num_agents);
        for i in 0..num_agents {
            let address = Address::Peer(PeerId(i));
            let transport = Arc::new(RoutedTransport::new(address, routes.clone()));
            let agent = self.setup.agent(i, transport)?;
            let inbox = inboxes
                .remove(&address)
                .ok_or_else(|| IeposError::Internal(format!("inbox of {address} missing")))?;
            agent_tasks.push(tokio::spawn(agent_loop(agent, inbox, done_tx.clone())));
        }
        drop(done_tx);

        let started = Instant::now();
        let waited = tokio::time::timeout(self.timeout, async {
            let mut finished = 0;
            while finished < num_agents {
                match done_rx.recv().await {
                    Some(Ok(id)) => {
                        finished += 1;
                        debug!("{} finished ({}/{})", id, finished, num_agents);
                    }
                    Some(Err(e)) => return Err(e),
                    None => break,
                }
            }
            Ok(finished)
        })
        .await;

        let outcome = match waited {
            Err(_) => Err(IeposError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
            Ok(Err(e)) => Err(e),
            Ok(Ok(finished)) if finished < num_agents => Err(IeposError::Stalled {
                unfinished: num_agents - finished,
            }),
            Ok(Ok(_)) => Ok(()),
        };
        if let Err(e) = outcome {
            error!("Actor run aborted: {}", e);
            broker_task.abort();
            agent_tasks.iter().for_each(|task| task.abort());
            return Err(e);
        }

        for (address, inbox) in routes.iter() {
            let _ = inbox.send(Envelope::new(*address, *address, Message::Stop));
        }

        broker_task
            .await
            .map_err(|e| IeposError::Internal(format!("broker task failed: {e}")))??;
        let mut agents = Vec::with_capacity(num_agents);
        for task in agent_tasks {
            let agent = task
                .await
                .map_err(|e| IeposError::Internal(format!("agent task failed: {e}")))??;
            agents.push(agent);
        }
        agents.sort_by_key(|a| a.id());
        info!(
            "Actor run of {} agents finished in {:?}",
            num_agents,
            started.elapsed()
        );
        Ok(agents)
    }
}

async fn agent_loop(
    mut agent: Agent,
    mut inbox: mpsc::UnboundedReceiver<Envelope>,
    done: mpsc::UnboundedSender<Result<PeerId>>,
) -> Result<Agent> {
    if let Err(e) = agent.start() {
        let _ = done.send(Err(IeposError::Internal(format!("{}: {}", agent.id(), e))));
        return Err(e);
    }
    let mut reported = false;
    while let Some(Envelope { from, message, .. }) = inbox.recv().await {
        if message == Message::Stop {
            break;
        }
        if let Err(e) = agent.handle(from, message) {
            let _ = done.send(Err(IeposError::Internal(format!("{}: {}", agent.id(), e))));
            return Err(e);
        }
        if !reported && agent.phase() == AgentPhase::Finished {
            reported = true;
            done.send(Ok(agent.id()))
                .map_err(|_| IeposError::Internal("completion channel closed".into()))?;
        }
    }
    Ok(agent)
}
