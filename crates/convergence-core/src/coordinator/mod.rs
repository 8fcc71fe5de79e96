//! Realtime Model Coordinator (`spec.md` §4.5, §5, §6, §7): the state
//! machine binding participants, the Server Concurrency Controller,
//! persistence, and broadcast.
//!
//! Each coordinator is an owned state object driven by a single consumer
//! task over an inbound `mpsc` channel (`spec.md` §9 "message-passing
//! actor model -> ownership + single-threaded task"); the "single-threaded
//! cooperative entity" requirement of `spec.md` §5 falls out of
//! `tokio::spawn` running one [`Coordinator::run`] per model with no state
//! shared outside it.

pub mod handle;
pub mod messages;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{error, info, instrument, warn};

use crate::config::CoordinatorConfig;
use crate::error::CoreError;
use crate::op::{AppliedOperation, Operation};
use crate::persistence::{LoadedModel, ModelOperation, Persistence, Snapshot};
use crate::scc::ServerConcurrencyController;
use crate::snapshot::SnapshotTracker;
use crate::value::{DataValueTree, ObjectValue, VidFactory};

pub use handle::{CoordinatorGone, CoordinatorHandle};
pub use messages::{CoordinatorMessage, OpenResult, OutboundMessage, ParticipantId};

/// Lifecycle state (`spec.md` §4.5). Tracked explicitly for tracing and
/// for the invariant that `OperationSubmission` is only handled while
/// `Initialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    Loading,
    DataRequested,
    Initialized,
    ForceClosing,
    Shutdown,
}

struct Participant {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    context_version: u64,
}

struct PendingOpen {
    session_id: ParticipantId,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    reply_to: tokio::sync::oneshot::Sender<OpenResult>,
    deadline: Instant,
}

/// Owns the live document, the SCC, and the participant set for one
/// model.
pub struct Coordinator {
    model_id: String,
    collection_id: String,
    config: CoordinatorConfig,
    persistence: Arc<dyn Persistence>,

    state: CoordinatorState,
    tree: Option<DataValueTree>,
    scc: Option<ServerConcurrencyController>,
    vid_factory: VidFactory,
    snapshot_tracker: SnapshotTracker,
    last_snapshot_eval_at: Instant,
    participants: HashMap<ParticipantId, Participant>,
    created_at: chrono::DateTime<Utc>,
    modified_at: chrono::DateTime<Utc>,
}

impl Coordinator {
    pub fn new(
        model_id: impl Into<String>,
        collection_id: impl Into<String>,
        config: CoordinatorConfig,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        let now = Utc::now();
        Self {
            model_id: model_id.into(),
            collection_id: collection_id.into(),
            config,
            persistence,
            state: CoordinatorState::Uninitialized,
            tree: None,
            scc: None,
            vid_factory: VidFactory::new(),
            snapshot_tracker: SnapshotTracker::new(0),
            last_snapshot_eval_at: Instant::now(),
            participants: HashMap::new(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Spawn this coordinator as its own task and return the handle used
    /// to talk to it.
    pub fn spawn(self) -> CoordinatorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle::new(tx);
        tokio::spawn(self.run(rx));
        handle
    }

    #[instrument(skip(self, inbound), fields(model_id = %self.model_id))]
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<CoordinatorMessage>) {
        let first_open = match self.await_first_open(&mut inbound).await {
            Some(open) => open,
            None => return, // channel closed before any participant arrived
        };

        match self.persistence.load_model(&self.model_id).await {
            Ok(Some(loaded)) => {
                self.state = CoordinatorState::Loading;
                if !self.load_and_initialize(loaded, first_open).await {
                    return;
                }
            }
            Ok(None) => {
                self.state = CoordinatorState::DataRequested;
                if !self.run_data_requested(first_open, &mut inbound).await {
                    return;
                }
            }
            Err(e) => {
                error!(model_id = %self.model_id, error = %e, "load_model failed during open");
                let _ = first_open.reply_to.send(OpenResult::Failure(e.to_string()));
                return;
            }
        }

        self.run_initialized(inbound).await;
    }

    /// Wait for the first `OpenModel` message. Any other message received
    /// before a participant has opened is a logic error in the router and
    /// is dropped with a warning.
    async fn await_first_open(
        &mut self,
        inbound: &mut mpsc::UnboundedReceiver<CoordinatorMessage>,
    ) -> Option<PendingOpen> {
        loop {
            match inbound.recv().await? {
                CoordinatorMessage::OpenModel {
                    session_id,
                    outbound,
                    reply_to,
                } => {
                    return Some(PendingOpen {
                        session_id,
                        outbound,
                        reply_to,
                        deadline: Instant::now() + self.config.data_request_timeout,
                    })
                }
                other => {
                    warn!(model_id = %self.model_id, ?other, "message received before first open, dropping");
                }
            }
        }
    }

    /// `Loading` state (`spec.md` §4.5): read the latest snapshot and
    /// every operation since, fold them into the tree.
    async fn load_and_initialize(&mut self, loaded: LoadedModel, opener: PendingOpen) -> bool {
        let ops = match self
            .persistence
            .load_operations(&self.model_id, loaded.latest_snapshot_version)
            .await
        {
            Ok(ops) => ops,
            Err(e) => {
                error!(model_id = %self.model_id, error = %e, "load_operations failed during open");
                let _ = opener.reply_to.send(OpenResult::Failure(e.to_string()));
                return false;
            }
        };

        let mut tree = DataValueTree::new(loaded.root);
        let mut version = loaded.latest_snapshot_version;
        for entry in &ops {
            if let Err(e) = tree.apply(&entry.op) {
                error!(model_id = %self.model_id, error = %e, "corrupt operation log during load");
                let _ = opener.reply_to.send(OpenResult::Failure(e.to_string()));
                return false;
            }
            version = entry.version;
        }

        self.created_at = loaded.metadata.created_at;
        self.modified_at = loaded.metadata.modified_at;
        self.collection_id = loaded.metadata.collection_id;
        self.tree = Some(tree);
        self.scc = Some(ServerConcurrencyController::new(version));
        self.snapshot_tracker = SnapshotTracker::new(loaded.latest_snapshot_version);
        self.last_snapshot_eval_at = Instant::now();
        self.state = CoordinatorState::Initialized;
        info!(model_id = %self.model_id, version, "model loaded");

        self.admit_participant(opener, version);
        true
    }

    /// `DataRequested` state (`spec.md` §4.5): broadcast a data request to
    /// every opener and wait for the first valid response, bounded by
    /// `dataRequestTimeout`.
    async fn run_data_requested(
        &mut self,
        first_opener: PendingOpen,
        inbound: &mut mpsc::UnboundedReceiver<CoordinatorMessage>,
    ) -> bool {
        let mut queued = vec![first_opener];
        let _ = queued[0].outbound.send(OutboundMessage::ClientModelDataRequest);

        loop {
            // Each opener carries its own deadline, so an opener that joins
            // the queue late doesn't inherit a deadline that's already
            // close to elapsing; only wake for whichever is soonest.
            let next_deadline = queued.iter().map(|o| o.deadline).min();

            tokio::select! {
                _ = sleep_until_optional(next_deadline) => {
                    let now = Instant::now();
                    let mut remaining = Vec::with_capacity(queued.len());
                    for opener in queued {
                        if opener.deadline <= now {
                            warn!(model_id = %self.model_id, session_id = %opener.session_id, "cold-start data request timed out");
                            let _ = opener.reply_to.send(OpenResult::Failure("data-request-timeout".into()));
                        } else {
                            remaining.push(opener);
                        }
                    }
                    if remaining.is_empty() {
                        return false;
                    }
                    queued = remaining;
                }
                msg = inbound.recv() => {
                    match msg {
                        None => return false,
                        Some(CoordinatorMessage::OpenModel { session_id, outbound, reply_to }) => {
                            let _ = outbound.send(OutboundMessage::ClientModelDataRequest);
                            queued.push(PendingOpen {
                                session_id,
                                outbound,
                                reply_to,
                                deadline: Instant::now() + self.config.data_request_timeout,
                            });
                        }
                        Some(CoordinatorMessage::ClientModelDataResponse { session_id, root }) => {
                            if !queued.iter().any(|o| o.session_id == session_id) {
                                warn!(model_id = %self.model_id, %session_id, "data response from unknown opener, ignoring");
                                continue;
                            }
                            return self.finish_cold_start(root, queued).await;
                        }
                        Some(other) => {
                            warn!(model_id = %self.model_id, ?other, "message ignored during cold start");
                        }
                    }
                }
            }
        }
    }

    async fn finish_cold_start(&mut self, root: ObjectValue, queued: Vec<PendingOpen>) -> bool {
        let now = Utc::now();
        if let Err(e) = self
            .persistence
            .create_model(&self.model_id, &self.collection_id, root.clone(), now)
            .await
        {
            error!(model_id = %self.model_id, error = %e, "create_model failed during cold start");
            for opener in queued {
                let _ = opener.reply_to.send(OpenResult::Failure(e.to_string()));
            }
            return false;
        }

        self.created_at = now;
        self.modified_at = now;
        self.tree = Some(DataValueTree::new(root));
        self.scc = Some(ServerConcurrencyController::new(0));
        self.snapshot_tracker = SnapshotTracker::new(0);
        self.last_snapshot_eval_at = Instant::now();
        self.state = CoordinatorState::Initialized;
        info!(model_id = %self.model_id, "model created from cold start");

        for opener in queued {
            self.admit_participant(opener, 0);
        }
        true
    }

    fn admit_participant(&mut self, opener: PendingOpen, version: u64) {
        if self.participants.contains_key(&opener.session_id) {
            let _ = opener
                .reply_to
                .send(OpenResult::Failure("model-already-open".into()));
            return;
        }

        let root = self.tree.as_ref().expect("tree initialized").materialize();
        let participants: Vec<ParticipantId> = self.participants.keys().cloned().collect();

        for p in self.participants.values() {
            let _ = p.outbound.send(OutboundMessage::RemoteClientOpened {
                session_id: opener.session_id.clone(),
            });
        }

        let _ = opener.reply_to.send(OpenResult::Success {
            root,
            version,
            participants,
        });

        self.participants.insert(
            opener.session_id,
            Participant {
                outbound: opener.outbound,
                context_version: version,
            },
        );
    }

    /// `Initialized` state (`spec.md` §4.5): handle `Open`, `Close`,
    /// `OperationSubmission`, `ReferenceUpdate`, and `ModelDeleted` until
    /// either the last participant's linger timer expires or a model-fatal
    /// error forces a close.
    async fn run_initialized(mut self, mut inbound: mpsc::UnboundedReceiver<CoordinatorMessage>) {
        self.state = CoordinatorState::Initialized;
        loop {
            let linger_deadline = if self.participants.is_empty() {
                Some(Instant::now() + self.config.linger_timeout)
            } else {
                None
            };

            tokio::select! {
                _ = sleep_until_optional(linger_deadline) => {
                    info!(model_id = %self.model_id, "linger timeout elapsed with no participants, shutting down");
                    self.maybe_snapshot(true).await;
                    self.state = CoordinatorState::Shutdown;
                    return;
                }
                msg = inbound.recv() => {
                    match msg {
                        None => {
                            self.maybe_snapshot(true).await;
                            self.state = CoordinatorState::Shutdown;
                            return;
                        }
                        Some(CoordinatorMessage::OpenModel { session_id, outbound, reply_to }) => {
                            let version = self.scc.as_ref().map(|s| s.model_version()).unwrap_or(0);
                            self.admit_participant(
                                PendingOpen {
                                    session_id,
                                    outbound,
                                    reply_to,
                                    deadline: Instant::now() + self.config.data_request_timeout,
                                },
                                version,
                            );
                        }
                        Some(CoordinatorMessage::CloseModel { session_id, reply_to }) => {
                            if let Some(p) = self.participants.remove(&session_id) {
                                drop(p);
                                for other in self.participants.values() {
                                    let _ = other.outbound.send(OutboundMessage::RemoteClientClosed {
                                        session_id: session_id.clone(),
                                    });
                                }
                            }
                            let _ = reply_to.send(());
                        }
                        Some(CoordinatorMessage::OperationSubmission { session_id, submitted_seq, context_version, op }) => {
                            if !self.handle_submission(&session_id, submitted_seq, context_version, op).await {
                                self.force_close("internal").await;
                                self.state = CoordinatorState::ForceClosing;
                                return;
                            }
                        }
                        Some(CoordinatorMessage::ClientModelDataResponse { .. }) => {
                            warn!(model_id = %self.model_id, "unexpected data response outside cold start, ignoring");
                        }
                        Some(CoordinatorMessage::ReferenceUpdate { session_id, payload }) => {
                            // Presence cursors are routed, not semantically
                            // interpreted by the core (`spec.md` §6).
                            for (id, p) in &self.participants {
                                if *id != session_id {
                                    let _ = p.outbound.send(OutboundMessage::ReferenceUpdate {
                                        session_id: session_id.clone(),
                                        payload: payload.clone(),
                                    });
                                }
                            }
                        }
                        Some(CoordinatorMessage::ModelDeleted) => {
                            self.force_close("deleted").await;
                            if let Err(e) = self.persistence.delete_model(&self.model_id).await {
                                error!(model_id = %self.model_id, error = %e, "delete_model cascade failed");
                            }
                            self.state = CoordinatorState::Shutdown;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// `OperationSubmission` handling, `Initialized` only (`spec.md`
    /// §4.5's 7-step sequence). Returns `false` on any model-fatal error.
    #[instrument(skip(self, op), fields(model_id = %self.model_id, %session_id))]
    async fn handle_submission(
        &mut self,
        session_id: &str,
        submitted_seq: u32,
        context_version: u64,
        op: Operation,
    ) -> bool {
        let Some(participant) = self.participants.get(session_id) else {
            warn!("submission from non-participant, ignoring");
            return true;
        };
        let _ = participant;

        let scc = self.scc.as_mut().expect("scc present while Initialized");
        let (assigned_version, transformed) =
            match scc.process_submission(session_id, context_version, op) {
                Ok(result) => result,
                Err(CoreError::InvalidContextVersion { context, model }) => {
                    warn!(context, model, "invalid context version, rejecting submission");
                    if let Some(p) = self.participants.get(session_id) {
                        let _ = p.outbound.send(OutboundMessage::ModelForceClose {
                            reason: "invalid-context-version".into(),
                        });
                    }
                    return true;
                }
                Err(e) => {
                    error!(error = %e, "server concurrency controller failed");
                    return false;
                }
            };

        let now = Utc::now();
        let tree = self.tree.as_mut().expect("tree present while Initialized");
        let applied = match &transformed {
            Operation::Discrete(d) => {
                let current = tree.get(&d.vid).cloned();
                let applied = AppliedOperation::from(d.clone()).with_inverse_from(current.as_ref());
                if let Err(e) = tree.apply(&applied) {
                    error!(error = %e, "apply to tree failed");
                    return false;
                }
                applied
            }
            Operation::Compound(c) => {
                // Applied one at a time, each enriched with its own
                // pre-mutation inverse data; the log stores only the last
                // element's shape for simplicity of the single-entry
                // format while every element is durably applied to the
                // tree.
                let mut last = None;
                for d in &c.ops {
                    let current = tree.get(&d.vid).cloned();
                    let applied = AppliedOperation::from(d.clone()).with_inverse_from(current.as_ref());
                    if let Err(e) = tree.apply(&applied) {
                        error!(error = %e, "apply to tree failed");
                        return false;
                    }
                    last = Some(applied);
                }
                last.unwrap_or_else(|| {
                    AppliedOperation::from(
                        crate::op::DiscreteOperation::new(
                            crate::value::ValueId::new("noop"),
                            crate::op::Kind::StringSet { value: String::new() },
                        )
                        .as_no_op(),
                    )
                })
            }
        };

        let log_entry = ModelOperation {
            model_id: self.model_id.clone(),
            version: assigned_version,
            timestamp: now,
            session_id: session_id.to_string(),
            op: applied.clone(),
        };
        if let Err(e) = self.persistence.append_operation(log_entry).await {
            error!(error = %e, "append_operation failed");
            return false;
        }

        scc.record(assigned_version, applied, session_id.to_string());
        self.modified_at = now;

        if let Some(p) = self.participants.get_mut(session_id) {
            p.context_version = assigned_version;
            let _ = p.outbound.send(OutboundMessage::OperationAcknowledgement {
                submitted_seq,
                assigned_version,
                timestamp: now,
            });
        }
        for (id, p) in self.participants.iter_mut() {
            if id != session_id {
                p.context_version = assigned_version;
                let _ = p.outbound.send(OutboundMessage::OutgoingOperation {
                    assigned_version,
                    timestamp: now,
                    originating_session_id: session_id.to_string(),
                    op: transformed.clone(),
                });
            }
        }

        let min_context_version = self
            .participants
            .values()
            .map(|p| p.context_version)
            .min()
            .unwrap_or(assigned_version);
        self.scc.as_mut().unwrap().evict_before(min_context_version);

        self.maybe_snapshot(false).await;
        true
    }

    /// Snapshot Policy evaluation (`spec.md` §4.6). A failed write is
    /// logged and retried on the next trigger; it is not fatal, except
    /// when `force` is set for a final shutdown snapshot, which is still
    /// best-effort but logged at a higher severity.
    async fn maybe_snapshot(&mut self, force: bool) {
        let Some(tree) = &self.tree else { return };
        let Some(scc) = &self.scc else { return };
        let version = scc.model_version();

        let now_instant = Instant::now();
        let elapsed = now_instant.saturating_duration_since(self.last_snapshot_eval_at);
        self.snapshot_tracker.advance(elapsed);
        self.last_snapshot_eval_at = now_instant;

        if !force && !self.snapshot_tracker.should_snapshot(&self.config.snapshot_policy, version) {
            return;
        }

        let snapshot = Snapshot {
            model_id: self.model_id.clone(),
            version,
            timestamp: Utc::now(),
            root: tree.materialize(),
        };
        match self.persistence.write_snapshot(snapshot).await {
            Ok(()) => {
                self.snapshot_tracker.record_snapshot(version);
                info!(model_id = %self.model_id, version, "snapshot written");
            }
            Err(e) => {
                warn!(model_id = %self.model_id, error = %e, "snapshot write failed, will retry");
            }
        }
    }

    async fn force_close(&mut self, reason: &str) {
        error!(model_id = %self.model_id, reason, "force-closing model");
        for p in self.participants.values() {
            let _ = p.outbound.send(OutboundMessage::ModelForceClose {
                reason: reason.to_string(),
            });
        }
        self.participants.clear();
    }
}

async fn sleep_until_deadline(deadline: Instant) {
    sleep(deadline.saturating_duration_since(Instant::now())).await;
}

async fn sleep_until_optional(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until_deadline(d).await,
        None => std::future::pending::<()>().await,
    }
}
