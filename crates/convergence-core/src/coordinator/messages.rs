//! Coordinator <-> session actor message types (`spec.md` §6 "External
//! interfaces").

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::op::Operation;
use crate::value::ObjectValue;

pub type ParticipantId = String;

/// Inbound messages, from client session actors (`spec.md` §6).
#[derive(Debug)]
pub enum CoordinatorMessage {
    OpenModel {
        session_id: ParticipantId,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        reply_to: oneshot::Sender<OpenResult>,
    },
    CloseModel {
        session_id: ParticipantId,
        reply_to: oneshot::Sender<()>,
    },
    OperationSubmission {
        session_id: ParticipantId,
        submitted_seq: u32,
        context_version: u64,
        op: Operation,
    },
    /// Only valid while the model is in `DataRequested`.
    ClientModelDataResponse {
        session_id: ParticipantId,
        root: ObjectValue,
    },
    /// Presence cursors; routed but out of core scope for semantics
    /// (`spec.md` §6).
    ReferenceUpdate {
        session_id: ParticipantId,
        payload: serde_json::Value,
    },
    ModelDeleted,
}

/// Outbound messages, to a single participant's session actor (`spec.md`
/// §6). Delivered over that participant's own channel to preserve
/// per-recipient FIFO.
#[derive(Debug, Clone, serde::Serialize)]
pub enum OutboundMessage {
    OpenSuccess {
        root: ObjectValue,
        version: u64,
        participants: Vec<ParticipantId>,
    },
    OpenFailure {
        reason: String,
    },
    CloseAck,
    ModelForceClose {
        reason: String,
    },
    ClientModelDataRequest,
    OperationAcknowledgement {
        submitted_seq: u32,
        assigned_version: u64,
        timestamp: DateTime<Utc>,
    },
    OutgoingOperation {
        assigned_version: u64,
        timestamp: DateTime<Utc>,
        originating_session_id: ParticipantId,
        op: Operation,
    },
    RemoteClientOpened {
        session_id: ParticipantId,
    },
    RemoteClientClosed {
        session_id: ParticipantId,
    },
    ReferenceUpdate {
        session_id: ParticipantId,
        payload: serde_json::Value,
    },
}

/// Reply to a synchronous `OpenModel` request.
#[derive(Debug)]
pub enum OpenResult {
    Success {
        root: ObjectValue,
        version: u64,
        participants: Vec<ParticipantId>,
    },
    Failure(String),
}
