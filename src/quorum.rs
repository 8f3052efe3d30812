use crate::message::{Message, Phase};
use crate::types::{ReplicaID, ViewNumber};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

/// Outcome of checking a quorum set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Pending,
    Reached,
}

/// Messages received for one `(view, phase)`, at most one per sender.
#[derive(Debug)]
pub struct QuorumSet<Op>
where
    Op: Clone + Debug + Send,
{
    view: ViewNumber,
    phase: Phase,
    messages: BTreeMap<ReplicaID, Message<Op>>,
}

impl<Op> QuorumSet<Op>
where
    Op: Clone + Debug + Send,
{
    pub fn new(view: ViewNumber, phase: Phase) -> QuorumSet<Op> {
        let messages = BTreeMap::default();
        QuorumSet {
            view,
            phase,
            messages,
        }
    }

    pub fn view(&self) -> ViewNumber {
        self.view
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of distinct senders.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, sender: ReplicaID) -> bool {
        self.messages.contains_key(&sender)
    }

    /// Messages ordered by sender.
    pub fn messages(&self) -> impl Iterator<Item = &Message<Op>> {
        self.messages.values()
    }

    /// A later message from the same sender replaces the earlier one.
    pub fn insert(&mut self, message: Message<Op>) {
        debug_assert_eq!(self.view, message.view());
        debug_assert_eq!(self.phase, message.phase());
        self.messages.insert(message.sender(), message);
    }

    /// Reached once strictly more than `threshold` replicas have spoken.
    pub fn decide(&self, threshold: usize) -> Decision {
        if self.len() > threshold {
            Decision::Reached
        } else {
            Decision::Pending
        }
    }

    /// Reached when exactly one message is present, the point-to-point
    /// START_VIEW rule.
    pub fn confirm(&self) -> Decision {
        if self.len() == 1 {
            Decision::Reached
        } else {
            Decision::Pending
        }
    }
}

/// Quorum sets keyed by `(view, phase)`.
#[derive(Debug)]
pub struct QuorumCollector<Op>
where
    Op: Clone + Debug + Send,
{
    sets: HashMap<(ViewNumber, Phase), QuorumSet<Op>>,
}

impl<Op> Default for QuorumCollector<Op>
where
    Op: Clone + Debug + Send,
{
    fn default() -> Self {
        QuorumCollector::new()
    }
}

impl<Op> QuorumCollector<Op>
where
    Op: Clone + Debug + Send,
{
    pub fn new() -> QuorumCollector<Op> {
        let sets = HashMap::default();
        QuorumCollector { sets }
    }

    /// Adds `message` to the set for its `(view, phase)`. Staleness is the
    /// caller's concern; nothing is rejected here.
    pub fn observe(&mut self, message: Message<Op>) -> &QuorumSet<Op> {
        let key = (message.view(), message.phase());
        let set = self
            .sets
            .entry(key)
            .or_insert_with(|| QuorumSet::new(key.0, key.1));
        set.insert(message);
        set
    }

    pub fn get(&self, view: ViewNumber, phase: Phase) -> Option<&QuorumSet<Op>> {
        self.sets.get(&(view, phase))
    }

    /// Number of distinct senders seen for `(view, phase)`.
    pub fn count(&self, view: ViewNumber, phase: Phase) -> usize {
        self.get(view, phase).map_or(0, QuorumSet::len)
    }

    pub fn discard(&mut self, view: ViewNumber, phase: Phase) -> Option<QuorumSet<Op>> {
        self.sets.remove(&(view, phase))
    }

    pub fn prune_below(&mut self, view: ViewNumber) {
        self.sets.retain(|(set_view, _), _| *set_view >= view);
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(view: ViewNumber, sender: ReplicaID) -> Message<u32> {
        Message::start_view_change(view, sender, 0)
    }

    #[test]
    fn test_threshold_boundary() {
        let f = 2;
        let mut collector = QuorumCollector::new();
        collector.observe(svc(0, 0));
        let set = collector.observe(svc(0, 1));
        assert_eq!(f, set.len());
        assert_eq!(Decision::Pending, set.decide(f));
        let set = collector.observe(svc(0, 2));
        assert_eq!(f + 1, set.len());
        assert_eq!(Decision::Reached, set.decide(f));
    }

    #[test]
    fn test_zero_threshold_needs_one_sender() {
        let set: QuorumSet<u32> = QuorumSet::new(0, Phase::StartViewChange);
        assert_eq!(Decision::Pending, set.decide(0));
        let mut collector = QuorumCollector::new();
        assert_eq!(Decision::Reached, collector.observe(svc(0, 0)).decide(0));
    }

    #[test]
    fn test_dedup_by_sender() {
        let mut collector = QuorumCollector::new();
        collector.observe(Message::do_view_change(1, 2, 1, vec![1]));
        let set = collector.observe(Message::do_view_change(1, 2, 2, vec![1, 2]));
        assert_eq!(1, set.len());
        let message = set.messages().next().unwrap();
        assert_eq!(2, message.timestamp());
        assert_eq!(&[1, 2], message.log());
    }

    #[test]
    fn test_keys_are_separate() {
        let mut collector = QuorumCollector::new();
        collector.observe(svc(0, 0));
        collector.observe(svc(1, 0));
        collector.observe(Message::do_view_change(0, 1, 0, vec![]));
        assert_eq!(3, collector.len());
        assert_eq!(1, collector.count(0, Phase::StartViewChange));
        assert_eq!(1, collector.count(0, Phase::DoViewChange));
        assert_eq!(0, collector.count(0, Phase::StartView));
    }

    #[test]
    fn test_confirm_requires_exactly_one() {
        let mut set = QuorumSet::new(0, Phase::StartView);
        assert_eq!(Decision::Pending, set.confirm());
        set.insert(Message::<u32>::start_view(0, 0, 0, vec![]));
        assert_eq!(Decision::Reached, set.confirm());
        set.insert(Message::<u32>::start_view(0, 1, 0, vec![]));
        assert_eq!(Decision::Pending, set.confirm());
    }

    #[test]
    fn test_discard_and_prune() {
        let mut collector = QuorumCollector::new();
        collector.observe(svc(0, 0));
        collector.observe(svc(1, 0));
        collector.observe(svc(2, 0));
        assert!(collector.discard(1, Phase::StartViewChange).is_some());
        assert!(collector.discard(1, Phase::StartViewChange).is_none());
        collector.prune_below(2);
        assert_eq!(1, collector.len());
        assert_eq!(1, collector.count(2, Phase::StartViewChange));
    }
}
