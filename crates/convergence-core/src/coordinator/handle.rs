//! [`CoordinatorHandle`]: the only way external code talks to a running
//! coordinator task, wrapping its inbound `mpsc::UnboundedSender`
//! (`spec.md` §9 "ask/future patterns -> typed request-reply channels").

use tokio::sync::{mpsc, oneshot};

use super::messages::{CoordinatorMessage, OpenResult, OutboundMessage};
use crate::op::Operation;
use crate::value::ObjectValue;

#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::UnboundedSender<CoordinatorMessage>,
}

/// Returned when the coordinator task has already exited (e.g. after
/// shutdown) and a message could not be delivered.
#[derive(Debug, thiserror::Error)]
#[error("coordinator is no longer running")]
pub struct CoordinatorGone;

impl CoordinatorHandle {
    pub fn new(sender: mpsc::UnboundedSender<CoordinatorMessage>) -> Self {
        Self { sender }
    }

    pub async fn open(
        &self,
        session_id: impl Into<String>,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Result<OpenResult, CoordinatorGone> {
        let (reply_to, reply_rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::OpenModel {
                session_id: session_id.into(),
                outbound,
                reply_to,
            })
            .map_err(|_| CoordinatorGone)?;
        reply_rx.await.map_err(|_| CoordinatorGone)
    }

    pub async fn close(&self, session_id: impl Into<String>) -> Result<(), CoordinatorGone> {
        let (reply_to, reply_rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::CloseModel {
                session_id: session_id.into(),
                reply_to,
            })
            .map_err(|_| CoordinatorGone)?;
        reply_rx.await.map_err(|_| CoordinatorGone)
    }

    pub fn submit(
        &self,
        session_id: impl Into<String>,
        submitted_seq: u32,
        context_version: u64,
        op: Operation,
    ) -> Result<(), CoordinatorGone> {
        self.sender
            .send(CoordinatorMessage::OperationSubmission {
                session_id: session_id.into(),
                submitted_seq,
                context_version,
                op,
            })
            .map_err(|_| CoordinatorGone)
    }

    pub fn respond_with_data(
        &self,
        session_id: impl Into<String>,
        root: ObjectValue,
    ) -> Result<(), CoordinatorGone> {
        self.sender
            .send(CoordinatorMessage::ClientModelDataResponse {
                session_id: session_id.into(),
                root,
            })
            .map_err(|_| CoordinatorGone)
    }

    pub fn reference_update(
        &self,
        session_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<(), CoordinatorGone> {
        self.sender
            .send(CoordinatorMessage::ReferenceUpdate {
                session_id: session_id.into(),
                payload,
            })
            .map_err(|_| CoordinatorGone)
    }

    pub fn model_deleted(&self) -> Result<(), CoordinatorGone> {
        self.sender
            .send(CoordinatorMessage::ModelDeleted)
            .map_err(|_| CoordinatorGone)
    }
}
