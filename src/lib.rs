pub mod agent;
pub mod error;
pub mod gossip;
pub mod metrics;
pub mod network;
pub mod simulation;
pub mod strategies;

pub use agent::AgentLearner;
pub use error::{SimError, SimResult};
pub use gossip::GossipChannel;
pub use metrics::MetricsCollector;
pub use network::ResourcePool;
pub use simulation::{Scheduler, SimConfig, Simulation};
pub use strategies::Strategy;

pub mod prelude {
    pub use crate::agent::{AgentLearner, LearnerParams};
    pub use crate::error::{SimError, SimResult};
    pub use crate::gossip::GossipChannel;
    pub use crate::metrics::{MetricsCollector, TickSnapshot};
    pub use crate::network::{FeedbackSet, Observation, ResourcePool};
    pub use crate::simulation::{Scenario, Scheduler, SimConfig, Simulation};
    pub use crate::strategies::{Strategy, StrategyRegistry};
}
