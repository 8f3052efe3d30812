use crate::types::{ReplicaID, ViewNumber};
use std::fmt::Debug;

/// One candidate log from a DO_VIEW_CHANGE quorum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate<'a, Op> {
    pub sender: ReplicaID,
    pub view: ViewNumber,
    pub log: &'a [Op],
}

/// Merges the logs of a DO_VIEW_CHANGE quorum into the log of the new view.
///
/// Implementations must never drop an entry that a quorum acknowledged in an
/// earlier view. Candidates are passed ordered by sender and always include
/// the new primary's own log.
pub trait LogReconciler<Op>
where
    Op: Clone + Debug + Send,
{
    fn reconcile(&self, candidates: &[Candidate<'_, Op>]) -> Vec<Op>;
}
