use crate::config::Config;
use crate::message::{Message, MessageError, Phase};
use crate::network::{Destination, Network};
use crate::quorum::{Decision, QuorumCollector, QuorumSet};
use crate::reconciler::{Candidate, LogReconciler};
use crate::types::{ReplicaID, Timestamp, ViewNumber};
use crossbeam_channel::{Receiver, TryRecvError};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::fmt::Debug;

/// Replica status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Not suspecting anyone; counts START_VIEW_CHANGE messages passively.
    Normal,
    /// Suspects the primary and has broadcast its START_VIEW_CHANGE.
    StartViewChange,
    /// Waiting for DO_VIEW_CHANGE messages as the view's primary, or for the
    /// primary's START_VIEW otherwise.
    DoViewChange,
    /// Completed a view change; the new view is armed like `Normal`.
    Started,
}

/// View change state owned by one replica.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicaState<Op>
where
    Op: Clone + Debug + Send,
{
    id: ReplicaID,
    view: ViewNumber,
    status: Status,
    log: Vec<Op>,
}

impl<Op> ReplicaState<Op>
where
    Op: Clone + Debug + Send,
{
    pub fn new(id: ReplicaID) -> ReplicaState<Op> {
        ReplicaState::with_log(id, Vec::default())
    }

    /// Starts in view 0 with an already committed `log`.
    pub fn with_log(id: ReplicaID, log: Vec<Op>) -> ReplicaState<Op> {
        ReplicaState {
            id,
            view: 0,
            status: Status::Normal,
            log,
        }
    }

    pub fn id(&self) -> ReplicaID {
        self.id
    }

    pub fn view(&self) -> ViewNumber {
        self.view
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn log(&self) -> &[Op] {
        &self.log
    }

    /// The phase of the messages this replica is waiting for.
    pub fn phase(&self, config: &Config) -> Phase {
        match self.status {
            Status::Normal | Status::Started | Status::StartViewChange => Phase::StartViewChange,
            Status::DoViewChange if self.id == config.primary_id(self.view) => Phase::DoViewChange,
            Status::DoViewChange => Phase::StartView,
        }
    }
}

/// What a single `step` achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Transitioned(Status),
    /// The replica moved to this view.
    ViewStarted(ViewNumber),
}

pub struct Replica<Op, N, R>
where
    Op: Clone + Debug + Send,
    N: Network<Op>,
    R: LogReconciler<Op>,
{
    self_id: ReplicaID,
    config: Config,
    network: N,
    reconciler: R,
    inner: Mutex<ReplicaInner<Op>>,
}

#[derive(Debug)]
struct ReplicaInner<Op>
where
    Op: Clone + Debug + Send,
{
    state: ReplicaState<Op>,
    quorums: QuorumCollector<Op>,
    clock: Timestamp,
    /// Everything sent since the last view advance, for retransmission.
    outbox: Vec<(Destination, Message<Op>)>,
}

impl<Op, N, R> Replica<Op, N, R>
where
    Op: Clone + Debug + Send,
    N: Network<Op>,
    R: LogReconciler<Op>,
{
    pub fn new(
        self_id: ReplicaID,
        config: Config,
        network: N,
        reconciler: R,
    ) -> Replica<Op, N, R> {
        Replica::with_state(config, ReplicaState::new(self_id), network, reconciler)
    }

    pub fn with_state(
        config: Config,
        state: ReplicaState<Op>,
        network: N,
        reconciler: R,
    ) -> Replica<Op, N, R> {
        assert!(state.id < config.nr_replicas());
        let inner = ReplicaInner {
            state,
            quorums: QuorumCollector::new(),
            clock: 0,
            outbox: Vec::default(),
        };
        Replica {
            self_id: inner.state.id,
            config,
            network,
            reconciler,
            inner: Mutex::new(inner),
        }
    }

    pub fn id(&self) -> ReplicaID {
        self.self_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn view(&self) -> ViewNumber {
        self.inner.lock().state.view
    }

    pub fn status(&self) -> Status {
        self.inner.lock().state.status
    }

    pub fn state(&self) -> ReplicaState<Op> {
        self.inner.lock().state.clone()
    }

    /// The committed log as of now.
    pub fn current_log(&self) -> Vec<Op> {
        self.inner.lock().state.log.clone()
    }

    /// Distinct senders counted so far for `(view, phase)`.
    pub fn quorum_count(&self, view: ViewNumber, phase: Phase) -> usize {
        self.inner.lock().quorums.count(view, phase)
    }

    /// Starts a view change away from the current primary. Ignored while a
    /// view change is already under way.
    pub fn suspect_primary(&self) {
        let mut inner = self.inner.lock();
        match inner.state.status {
            Status::Normal | Status::Started => {
                self.initiate(&mut inner);
                self.evaluate(&mut inner);
            }
            Status::StartViewChange | Status::DoViewChange => {
                debug!(
                    "Replica {} already changing view {}",
                    self.self_id, inner.state.view
                );
            }
        }
    }

    /// Counts one message and takes any transition it enables.
    pub fn on_message(&self, message: Message<Op>) -> Result<(), MessageError> {
        let mut inner = self.inner.lock();
        self.accept(&mut inner, message)?;
        self.evaluate(&mut inner);
        Ok(())
    }

    /// Waits once for messages and acts on them.
    pub fn step(&self) -> Progress {
        let (view, phase) = {
            let inner = self.inner.lock();
            (inner.state.view, inner.state.phase(&self.config))
        };
        let messages = self.network.wait_for_messages(view, phase);
        let mut inner = self.inner.lock();
        let before = (inner.state.view, inner.state.status);
        for message in messages {
            if let Err(err) = self.accept(&mut inner, message) {
                debug!("Replica {} discards message: {}", self.self_id, err);
            }
        }
        self.evaluate(&mut inner);
        if inner.state.view != before.0 {
            Progress::ViewStarted(inner.state.view)
        } else if inner.state.status != before.1 {
            Progress::Transitioned(inner.state.status)
        } else {
            Progress::Pending
        }
    }

    /// Retransmits everything sent since the last view advance.
    pub fn on_idle(&self) {
        let inner = self.inner.lock();
        for (destination, message) in &inner.outbox {
            trace!("Replica {} resends {:?}", self.self_id, message);
            if let Err(err) = self.network.send(*destination, message.clone()) {
                warn!("Replica {} failed to resend: {}", self.self_id, err);
            }
        }
    }

    /// Drives the replica until `shutdown` fires or disconnects.
    pub fn run(&self, shutdown: &Receiver<()>) {
        loop {
            match shutdown.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => {
                    info!("Replica {} shutting down", self.self_id);
                    return;
                }
                Err(TryRecvError::Empty) => {}
            }
            if self.step() == Progress::Pending {
                self.on_idle();
            }
        }
    }

    fn accept(
        &self,
        inner: &mut ReplicaInner<Op>,
        message: Message<Op>,
    ) -> Result<(), MessageError> {
        trace!("Replica {} <- {:?}", self.self_id, message);
        message.validate(&self.config)?;
        if message.view() < inner.state.view {
            return Err(MessageError::Stale {
                view: message.view(),
                current: inner.state.view,
            });
        }
        let primary = self.config.primary_id(message.view());
        let misrouted = match message.phase() {
            Phase::StartViewChange => false,
            Phase::DoViewChange => self.self_id != primary,
            Phase::StartView => message.sender() != primary,
        };
        if misrouted {
            return Err(MessageError::NotPrimary {
                view: message.view(),
                phase: message.phase(),
                primary,
            });
        }
        if message.view() > inner.state.view {
            let rejoin = message.phase() != Phase::StartView;
            self.enter_view(inner, message.view(), rejoin);
        }
        inner.quorums.observe(message);
        Ok(())
    }

    /// Abandons the current wait for a later view.
    fn enter_view(&self, inner: &mut ReplicaInner<Op>, view: ViewNumber, rejoin: bool) {
        info!(
            "Replica {} jumps from view {} to view {}",
            self.self_id, inner.state.view, view
        );
        inner.state.view = view;
        inner.state.status = Status::Normal;
        inner.quorums.prune_below(view);
        inner.outbox.clear();
        if rejoin {
            self.initiate(inner);
        }
    }

    fn initiate(&self, inner: &mut ReplicaInner<Op>) {
        let view = inner.state.view;
        info!("Replica {} starts view change in view {}", self.self_id, view);
        inner.state.status = Status::StartViewChange;
        let timestamp = self.tick(inner);
        let message = Message::start_view_change(view, self.self_id, timestamp);
        inner.quorums.observe(message.clone());
        self.send(inner, Destination::All, message);
    }

    fn evaluate(&self, inner: &mut ReplicaInner<Op>) {
        while self.transition(inner) {}
    }

    /// Takes at most one transition; returns whether it did.
    fn transition(&self, inner: &mut ReplicaInner<Op>) -> bool {
        let view = inner.state.view;
        let primary = self.config.primary_id(view);
        let max_faulty = self.config.max_faulty();
        if self.self_id != primary {
            let confirmed = inner
                .quorums
                .get(view, Phase::StartView)
                .filter(|set| set.confirm() == Decision::Reached)
                .and_then(|set| set.messages().next())
                .map(|message| message.log().to_vec());
            if let Some(log) = confirmed {
                self.complete(inner, log);
                return true;
            }
        }
        match inner.state.status {
            Status::Normal | Status::Started | Status::StartViewChange => {
                if decide(inner.quorums.get(view, Phase::StartViewChange), max_faulty)
                    == Decision::Pending
                {
                    return false;
                }
                inner.state.status = Status::DoViewChange;
                let timestamp = self.tick(inner);
                let message = Message::do_view_change(
                    view,
                    self.self_id,
                    timestamp,
                    inner.state.log.clone(),
                );
                if self.self_id == primary {
                    debug!("Replica {} is candidate primary of view {}", self.self_id, view);
                    inner.quorums.observe(message);
                } else {
                    self.send(inner, Destination::Replica(primary), message);
                }
                true
            }
            Status::DoViewChange if self.self_id == primary => {
                let log = match inner.quorums.get(view, Phase::DoViewChange) {
                    Some(set) if set.decide(max_faulty) == Decision::Reached => {
                        let candidates: Vec<_> = set
                            .messages()
                            .map(|message| Candidate {
                                sender: message.sender(),
                                view: message.view(),
                                log: message.log(),
                            })
                            .collect();
                        self.reconciler.reconcile(&candidates)
                    }
                    _ => return false,
                };
                let timestamp = self.tick(inner);
                let message = Message::start_view(view, self.self_id, timestamp, log.clone());
                self.complete(inner, log);
                self.send(inner, Destination::All, message);
                true
            }
            Status::DoViewChange => false,
        }
    }

    fn complete(&self, inner: &mut ReplicaInner<Op>, log: Vec<Op>) {
        inner.state.log = log;
        inner.state.view += 1;
        inner.state.status = Status::Started;
        inner.quorums.prune_below(inner.state.view);
        inner.outbox.clear();
        info!(
            "Replica {} started view {} with {} log entries",
            self.self_id,
            inner.state.view,
            inner.state.log.len()
        );
    }

    fn send(&self, inner: &mut ReplicaInner<Op>, destination: Destination, message: Message<Op>) {
        trace!("Replica {} -> {:?}: {:?}", self.self_id, destination, message);
        if let Err(err) = self.network.send(destination, message.clone()) {
            warn!("Replica {} failed to send: {}", self.self_id, err);
        }
        inner.outbox.push((destination, message));
    }

    fn tick(&self, inner: &mut ReplicaInner<Op>) -> Timestamp {
        inner.clock += 1;
        inner.clock
    }
}

fn decide<Op>(set: Option<&QuorumSet<Op>>, threshold: usize) -> Decision
where
    Op: Clone + Debug + Send,
{
    set.map_or(Decision::Pending, |set| set.decide(threshold))
}
