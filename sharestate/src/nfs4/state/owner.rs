//! Open-owner registry
use super::stateid::StateOther;
use crate::nfs4::ops::{OpenOwner4, ResultOp4, SequenceId4};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Sequencing state of one (client, owner) pair
#[derive(Debug)]
pub struct OpenOwner {
    pub id: OpenOwner4,
    /// Seqid the next new request must carry
    pub next_seqid: SequenceId4,
    /// Packed image of the last request that advanced the seqid
    pub last_request: Option<Bytes>,
    /// Reply to `last_request`, returned again on retransmission
    pub last_response: Option<ResultOp4>,
    /// OPEN_CONFIRM has been accepted for this owner
    pub confirmed: bool,
    /// Most recently closed stateid, kept routable for CLOSE replays
    pub retired: Option<StateOther>,
    /// Removed from the registry; a request that finds this owner after
    /// locking it must look the owner up again
    pub released: bool,
}

impl OpenOwner {
    pub(crate) fn new(id: OpenOwner4, first_seqid: SequenceId4) -> Self {
        OpenOwner {
            id,
            next_seqid: first_seqid,
            last_request: None,
            last_response: None,
            confirmed: false,
            retired: None,
            released: false,
        }
    }

    pub fn last_request_seqid(&self) -> SequenceId4 {
        self.next_seqid.wrapping_sub(1)
    }
}

pub type OwnerSlot = Arc<Mutex<OpenOwner>>;

/// Exclusive home of every `OpenOwner`; each owner sits behind its own
/// lock so that requests of one owner are totally ordered while other
/// owners proceed in parallel.
#[derive(Default)]
pub struct OpenOwnerRegistry {
    owners: RwLock<HashMap<OpenOwner4, OwnerSlot>>,
}

impl OpenOwnerRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get(&self, id: &OpenOwner4) -> Option<OwnerSlot> {
        self.owners.read().get(id).cloned()
    }

    /// Returns the owner, registering it with `first_seqid` as its
    /// expected seqid when it has not been seen before
    pub fn get_or_create(&self, id: &OpenOwner4, first_seqid: SequenceId4) -> OwnerSlot {
        if let Some(slot) = self.get(id) {
            return slot;
        }

        let mut owners = self.owners.write();
        owners
            .entry(id.clone())
            .or_insert_with(|| {
                info!(client_id = id.client_id, owner = ?id.owner, first_seqid, "new open owner");
                Arc::new(Mutex::new(OpenOwner::new(id.clone(), first_seqid)))
            })
            .clone()
    }

    /// Forgets an owner, as lease expiry of its client would
    pub fn remove(&self, id: &OpenOwner4) -> Option<OwnerSlot> {
        self.owners.write().remove(id)
    }
}
