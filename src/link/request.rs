//! Requester-facing request types and the `RequestSync` codec.

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};
use crate::protocol::{Header, Message, MessagePayload, ProtocolId};
use crate::time::VirtualTime;

/// A CREATE request: generate `pair_count` entangled pairs for `purpose_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub purpose_id: u32,
    pub pair_count: u32,
}

impl CreateRequest {
    pub fn new(purpose_id: u32, pair_count: u32) -> Self {
        CreateRequest { purpose_id, pair_count }
    }
}

/// Every request kind the link layer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkRequest {
    Create(CreateRequest),
}

impl LinkRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            LinkRequest::Create(_) => RequestKind::Create,
        }
    }
}

impl From<CreateRequest> for LinkRequest {
    fn from(req: CreateRequest) -> Self {
        LinkRequest::Create(req)
    }
}

/// Handler tag carried next to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Create,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::Create => write!(f, "CREATE"),
        }
    }
}

/// Identifies a request on both sides of the link and all pairs it yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CreationId(pub u64);

impl std::fmt::Display for CreationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// Fields resolved when a request is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestExtras {
    pub creation_id: CreationId,
    /// The EGP the requester talked to.
    pub origin: ProtocolId,
}

/// A request waiting in an EGP queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
    pub start_time: VirtualTime,
    pub handler: RequestKind,
    pub request: LinkRequest,
    pub extras: RequestExtras,
}

/// One delivered pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    pub purpose_id: u32,
    pub creation_id: CreationId,
    pub logical_qubit_position: usize,
}

// ── RequestSync ───────────────────────────────────────────────────────

/// The request descriptor sent to the peer EGP so both sides agree on the
/// start time and creation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSync {
    pub request: LinkRequest,
    pub handler: RequestKind,
    pub start_time: VirtualTime,
    pub extras: RequestExtras,
}

impl RequestSync {
    pub fn from_queued(queued: &QueuedRequest) -> Self {
        RequestSync {
            request: queued.request,
            handler: queued.handler,
            start_time: queued.start_time,
            extras: queued.extras,
        }
    }

    /// Wrap as a `RequestSync`-tagged message with a JSON body.
    pub fn encode(&self) -> LinkResult<Message> {
        let body = serde_json::to_vec(self).map_err(|e| LinkError::MalformedSyncMessage(e.to_string()))?;
        Ok(Message::new(Header::RequestSync, MessagePayload::Data(body)))
    }

    pub fn decode(message: &Message) -> LinkResult<Self> {
        if message.header != Header::RequestSync {
            return Err(LinkError::MalformedSyncMessage(format!(
                "unexpected header {}",
                message.header
            )));
        }
        let MessagePayload::Data(body) = &message.payload else {
            return Err(LinkError::MalformedSyncMessage(format!(
                "expected a data payload, got {}",
                message.payload
            )));
        };
        let sync: RequestSync =
            serde_json::from_slice(body).map_err(|e| LinkError::MalformedSyncMessage(e.to_string()))?;
        if sync.handler != sync.request.kind() {
            return Err(LinkError::MalformedSyncMessage(format!(
                "handler {} does not match request kind {}",
                sync.handler,
                sync.request.kind()
            )));
        }
        Ok(sync)
    }
}
