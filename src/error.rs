use crate::network::{AgentId, NetworkId, Tick};
use thiserror::Error;

pub type SimResult<T> = std::result::Result<T, SimError>;

// Invariant violations abort the run, config errors are rejected before tick 1.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimError {
    #[error("agent {agent} sampled from a probability vector containing zero at tick {tick}: {probabilities:?}")]
    ZeroProbability {
        agent: AgentId,
        tick: Tick,
        probabilities: Vec<f64>,
    },

    #[error("agent {agent} got an observation from tick {observed} outside its history window (tick {current}, {depth} snapshots)")]
    HistoryOutOfRange {
        agent: AgentId,
        current: Tick,
        observed: Tick,
        depth: usize,
    },

    #[error("agent {agent} has zero probability of knowing network {network} in the snapshot of tick {tick}")]
    ZeroKnowledgeProbability {
        agent: AgentId,
        network: NetworkId,
        tick: Tick,
    },

    #[error("agent {0} has no available networks")]
    NoAvailableNetwork(AgentId),

    #[error("unknown network {0}")]
    UnknownNetwork(NetworkId),

    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for the errors that mean the simulation state itself is inconsistent.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::ZeroProbability { .. }
                | Self::HistoryOutOfRange { .. }
                | Self::ZeroKnowledgeProbability { .. }
        )
    }
}
