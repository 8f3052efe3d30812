use crate::message::{Message, Phase};
use crate::types::{ReplicaID, ViewNumber};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::trace;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Where a message goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    /// Every replica except the sender.
    All,
    Replica(ReplicaID),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("replica {0} is not reachable")]
    Disconnected(ReplicaID),
    #[error("replica {0} is unknown")]
    UnknownReplica(ReplicaID),
}

/// Transport between replicas.
///
/// Delivery may lose, duplicate, and reorder messages.
pub trait Network<Op>
where
    Op: Clone + Debug + Send,
{
    /// Fire-and-forget send.
    fn send(&self, destination: Destination, message: Message<Op>) -> Result<(), NetworkError>;

    /// Blocks until some in-flight messages for `(view, phase)` are available
    /// and returns them. May return nothing, and may include messages for
    /// other phases or later views.
    fn wait_for_messages(&self, view: ViewNumber, phase: Phase) -> Vec<Message<Op>>;
}

impl<Op, N> Network<Op> for Arc<N>
where
    Op: Clone + Debug + Send,
    N: Network<Op> + ?Sized,
{
    fn send(&self, destination: Destination, message: Message<Op>) -> Result<(), NetworkError> {
        (**self).send(destination, message)
    }

    fn wait_for_messages(&self, view: ViewNumber, phase: Phase) -> Vec<Message<Op>> {
        (**self).wait_for_messages(view, phase)
    }
}

/// Network over in-process channels, one inbox per replica.
pub struct ChannelNetwork<Op>
where
    Op: Clone + Debug + Send,
{
    self_id: ReplicaID,
    peers: Vec<Sender<Message<Op>>>,
    inbox: Receiver<Message<Op>>,
    timeout: Duration,
}

impl<Op> ChannelNetwork<Op>
where
    Op: Clone + Debug + Send,
{
    /// Builds a fully connected cluster. A wait gives up after `timeout`
    /// without traffic.
    pub fn cluster(nr_replicas: usize, timeout: Duration) -> Vec<ChannelNetwork<Op>> {
        let (peers, inboxes): (Vec<_>, Vec<_>) = (0..nr_replicas)
            .map(|_| crossbeam_channel::unbounded())
            .unzip();
        inboxes
            .into_iter()
            .enumerate()
            .map(|(self_id, inbox)| ChannelNetwork {
                self_id,
                peers: peers.clone(),
                inbox,
                timeout,
            })
            .collect()
    }

    pub fn self_id(&self) -> ReplicaID {
        self.self_id
    }

    fn send_to(&self, replica_id: ReplicaID, message: Message<Op>) -> Result<(), NetworkError> {
        let peer = self
            .peers
            .get(replica_id)
            .ok_or(NetworkError::UnknownReplica(replica_id))?;
        trace!("Replica {} -> {}: {:?}", self.self_id, replica_id, message);
        peer.send(message)
            .map_err(|_| NetworkError::Disconnected(replica_id))
    }
}

impl<Op> Network<Op> for ChannelNetwork<Op>
where
    Op: Clone + Debug + Send,
{
    fn send(&self, destination: Destination, message: Message<Op>) -> Result<(), NetworkError> {
        match destination {
            Destination::Replica(replica_id) => self.send_to(replica_id, message),
            Destination::All => {
                let mut result = Ok(());
                for replica_id in 0..self.peers.len() {
                    if replica_id == self.self_id {
                        continue;
                    }
                    if let Err(err) = self.send_to(replica_id, message.clone()) {
                        result = result.and(Err(err));
                    }
                }
                result
            }
        }
    }

    /// Returns every queued message for `view` or later, whatever its phase.
    fn wait_for_messages(&self, view: ViewNumber, phase: Phase) -> Vec<Message<Op>> {
        let mut messages = match self.inbox.recv_timeout(self.timeout) {
            Ok(message) => vec![message],
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                trace!(
                    "Replica {} waited on {:?} in view {} without traffic",
                    self.self_id,
                    phase,
                    view
                );
                return Vec::new();
            }
        };
        messages.extend(self.inbox.try_iter());
        messages.retain(|message| {
            let current = message.view() >= view;
            if !current {
                trace!("Replica {} drops stale {:?}", self.self_id, message);
            }
            current
        });
        messages
    }
}

/// Network that hands out pre-recorded batches and records what is sent.
///
/// Each wait pops one batch; once the script runs out, waits return nothing.
#[derive(Debug)]
pub struct ScriptedNetwork<Op>
where
    Op: Clone + Debug + Send,
{
    deliveries: Mutex<VecDeque<Vec<Message<Op>>>>,
    sent: Mutex<Vec<(Destination, Message<Op>)>>,
    waits: Mutex<Vec<(ViewNumber, Phase)>>,
}

impl<Op> Default for ScriptedNetwork<Op>
where
    Op: Clone + Debug + Send,
{
    fn default() -> Self {
        ScriptedNetwork::new()
    }
}

impl<Op> ScriptedNetwork<Op>
where
    Op: Clone + Debug + Send,
{
    pub fn new() -> ScriptedNetwork<Op> {
        ScriptedNetwork {
            deliveries: Mutex::new(VecDeque::default()),
            sent: Mutex::new(Vec::default()),
            waits: Mutex::new(Vec::default()),
        }
    }

    /// Queues the result of one future wait.
    pub fn deliver(&self, batch: Vec<Message<Op>>) {
        self.deliveries.lock().push_back(batch);
    }

    pub fn pending(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Drains everything sent so far.
    pub fn take_sent(&self) -> Vec<(Destination, Message<Op>)> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Every `(view, phase)` waited on, in order.
    pub fn waits(&self) -> Vec<(ViewNumber, Phase)> {
        self.waits.lock().clone()
    }
}

impl<Op> Network<Op> for ScriptedNetwork<Op>
where
    Op: Clone + Debug + Send,
{
    fn send(&self, destination: Destination, message: Message<Op>) -> Result<(), NetworkError> {
        self.sent.lock().push((destination, message));
        Ok(())
    }

    fn wait_for_messages(&self, view: ViewNumber, phase: Phase) -> Vec<Message<Op>> {
        self.waits.lock().push((view, phase));
        self.deliveries.lock().pop_front().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_broadcast_skips_sender() {
        let mut networks = ChannelNetwork::<u32>::cluster(3, Duration::from_millis(10));
        let c = networks.pop().unwrap();
        let b = networks.pop().unwrap();
        let a = networks.pop().unwrap();
        assert_eq!(0, a.self_id());
        a.send(Destination::All, Message::start_view_change(0, 0, 1))
            .unwrap();
        assert!(a.wait_for_messages(0, Phase::StartViewChange).is_empty());
        assert_eq!(1, b.wait_for_messages(0, Phase::StartViewChange).len());
        assert_eq!(1, c.wait_for_messages(0, Phase::StartViewChange).len());
    }

    #[test]
    fn test_channel_unicast_and_stale_filter() {
        let networks = ChannelNetwork::<u32>::cluster(2, Duration::from_millis(10));
        let (a, b) = (&networks[0], &networks[1]);
        a.send(Destination::Replica(1), Message::start_view_change(0, 0, 1))
            .unwrap();
        a.send(Destination::Replica(1), Message::do_view_change(2, 0, 2, vec![]))
            .unwrap();
        let messages = b.wait_for_messages(1, Phase::StartViewChange);
        assert_eq!(1, messages.len());
        assert_eq!(2, messages[0].view());
        assert_eq!(
            Err(NetworkError::UnknownReplica(5)),
            a.send(Destination::Replica(5), Message::start_view_change(0, 0, 3))
        );
    }

    #[test]
    fn test_channel_disconnected_peer() {
        let mut networks = ChannelNetwork::<u32>::cluster(2, Duration::from_millis(10));
        drop(networks.pop());
        let a = &networks[0];
        assert_eq!(
            Err(NetworkError::Disconnected(1)),
            a.send(Destination::All, Message::start_view_change(0, 0, 1))
        );
    }

    #[test]
    fn test_scripted_batches() {
        let network = ScriptedNetwork::<u32>::new();
        network.deliver(vec![Message::start_view_change(0, 1, 1)]);
        assert_eq!(1, network.pending());
        assert_eq!(1, network.wait_for_messages(0, Phase::StartViewChange).len());
        assert!(network.wait_for_messages(0, Phase::DoViewChange).is_empty());
        assert_eq!(
            vec![(0, Phase::StartViewChange), (0, Phase::DoViewChange)],
            network.waits()
        );
        network
            .send(Destination::Replica(2), Message::start_view_change(0, 0, 2))
            .unwrap();
        assert_eq!(1, network.take_sent().len());
        assert!(network.take_sent().is_empty());
    }
}
