pub mod agent;
pub mod cli;
pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod func;
pub mod logging;
pub mod measurement;
pub mod message;
pub mod runtime;
pub mod selection;
pub mod topology;
pub mod transport;

pub use agent::{Agent, AgentContext, AgentPhase, ReorganizationKind, ReorganizationStrategy};
pub use config::AppConfig;
pub use data::{Plan, Vector};
pub use error::{IeposError, Result};
pub use measurement::{MeasurementLog, MeasurementSink, Tag};
pub use runtime::{ActorRuntime, LocalRuntime, RunReport, RunSetup};
pub use topology::{PeerId, TopologyBroker, TopologyClient, TopologyGenerator};
