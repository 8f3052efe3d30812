pub mod config;
pub mod message;
pub mod network;
pub mod quorum;
pub mod reconciler;
pub mod replica;

mod types;

pub use config::{primary, Config, ConfigError};
pub use message::{empty_log, Message, MessageError, Phase};
pub use network::{ChannelNetwork, Destination, Network, NetworkError, ScriptedNetwork};
pub use quorum::{Decision, QuorumCollector, QuorumSet};
pub use reconciler::{Candidate, LogReconciler};
pub use replica::{Progress, Replica, ReplicaState, Status};
pub use types::{ReplicaID, Timestamp, ViewNumber};
