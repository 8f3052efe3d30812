use crate::config::Config;
use crate::types::{ReplicaID, Timestamp, ViewNumber};
use std::fmt::Debug;
use thiserror::Error;

/// View change phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    StartViewChange,
    DoViewChange,
    StartView,
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> u8 {
        match phase {
            Phase::StartViewChange => 0,
            Phase::DoViewChange => 1,
            Phase::StartView => 2,
        }
    }
}

impl TryFrom<u8> for Phase {
    type Error = MessageError;

    fn try_from(tag: u8) -> Result<Phase, MessageError> {
        match tag {
            0 => Ok(Phase::StartViewChange),
            1 => Ok(Phase::DoViewChange),
            2 => Ok(Phase::StartView),
            _ => Err(MessageError::UnknownPhase(tag)),
        }
    }
}

/// Reasons a replica refuses to count a message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("unknown phase tag {0}")]
    UnknownPhase(u8),
    #[error("sender {sender} is not a member of a {nr_replicas} replica cluster")]
    SenderOutOfRange {
        sender: ReplicaID,
        nr_replicas: usize,
    },
    #[error("message for view {view} is stale, replica is in view {current}")]
    Stale {
        view: ViewNumber,
        current: ViewNumber,
    },
    #[error("{phase:?} for view {view} does not involve primary {primary}")]
    NotPrimary {
        view: ViewNumber,
        phase: Phase,
        primary: ReplicaID,
    },
}

/// The log attached to every START_VIEW_CHANGE, regardless of what the
/// sender has actually committed.
pub fn empty_log<Op>() -> Vec<Op> {
    Vec::new()
}

/// View change message. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Message<Op>
where
    Op: Clone + Debug + Send,
{
    view: ViewNumber,
    phase: Phase,
    sender: ReplicaID,
    timestamp: Timestamp,
    log: Vec<Op>,
}

impl<Op> Message<Op>
where
    Op: Clone + Debug + Send,
{
    pub fn new(
        view: ViewNumber,
        phase: Phase,
        sender: ReplicaID,
        timestamp: Timestamp,
        log: Vec<Op>,
    ) -> Message<Op> {
        Message {
            view,
            phase,
            sender,
            timestamp,
            log,
        }
    }

    pub fn start_view_change(
        view: ViewNumber,
        sender: ReplicaID,
        timestamp: Timestamp,
    ) -> Message<Op> {
        Message::new(view, Phase::StartViewChange, sender, timestamp, empty_log())
    }

    pub fn do_view_change(
        view: ViewNumber,
        sender: ReplicaID,
        timestamp: Timestamp,
        log: Vec<Op>,
    ) -> Message<Op> {
        Message::new(view, Phase::DoViewChange, sender, timestamp, log)
    }

    pub fn start_view(
        view: ViewNumber,
        sender: ReplicaID,
        timestamp: Timestamp,
        log: Vec<Op>,
    ) -> Message<Op> {
        Message::new(view, Phase::StartView, sender, timestamp, log)
    }

    pub fn view(&self) -> ViewNumber {
        self.view
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sender(&self) -> ReplicaID {
        self.sender
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn log(&self) -> &[Op] {
        &self.log
    }

    /// Checks the parts of a message that do not depend on replica state.
    pub fn validate(&self, config: &Config) -> Result<(), MessageError> {
        if self.sender >= config.nr_replicas() {
            return Err(MessageError::SenderOutOfRange {
                sender: self.sender,
                nr_replicas: config.nr_replicas(),
            });
        }
        Ok(())
    }
}
