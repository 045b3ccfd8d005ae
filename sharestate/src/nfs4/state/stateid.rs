//! Stateid allocation and validation
use crate::{
    fs::FileId,
    nfs4::ops::{OpenOwner4, StateId4, NFS4_OTHER_SIZE},
    result::{NfsError, Result},
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

pub type StateOther = [u8; NFS4_OTHER_SIZE];

/// What a live stateid is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRef {
    pub owner: OpenOwner4,
    pub file: FileId,
}

/// Mints stateids unique for the lifetime of a server instance.
///
/// The `other` field is the instance epoch followed by a counter, so a
/// stateid from an earlier instance is recognizable as stale without
/// any persisted state.
pub struct StateidIssuer {
    epoch: u32,
    counter: AtomicU64,
    live: RwLock<HashMap<StateOther, StateRef>>,
    /// Closed stateids still routed to their owner so that a
    /// retransmitted CLOSE finds the owner's replay cache
    retired: RwLock<HashMap<StateOther, OpenOwner4>>,
}

impl StateidIssuer {
    pub fn new(epoch: u32) -> Self {
        StateidIssuer {
            epoch,
            counter: AtomicU64::new(1),
            live: RwLock::new(HashMap::new()),
            retired: RwLock::new(HashMap::new()),
        }
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Allocates a stateid for a new open of `file` by `owner`
    pub fn issue(&self, file: FileId, owner: &OpenOwner4) -> StateId4 {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut other = [0u8; NFS4_OTHER_SIZE];
        other[..4].copy_from_slice(&self.epoch.to_be_bytes());
        other[4..].copy_from_slice(&n.to_be_bytes());

        self.live.write().insert(
            other,
            StateRef {
                owner: owner.clone(),
                file,
            },
        );

        StateId4 { seqid: 1, other }
    }

    /// Resolves a stateid to the open it names. Seqid freshness is
    /// checked by the file table, which holds the current value.
    pub fn validate(&self, stateid: &StateId4) -> Result<StateRef> {
        if stateid.is_anonymous() {
            return Err(NfsError::BadStateid);
        }

        if stateid.other[..4] != self.epoch.to_be_bytes() {
            warn!(?stateid, epoch = self.epoch, "stateid from another server instance");
            return Err(NfsError::StaleStateid);
        }

        self.live
            .read()
            .get(&stateid.other)
            .cloned()
            .ok_or(NfsError::BadStateid)
    }

    /// Stops accepting `other`, keeping only its owner for replay routing
    pub fn retire(&self, other: &StateOther) {
        if let Some(state) = self.live.write().remove(other) {
            self.retired.write().insert(*other, state.owner);
        }
    }

    /// Drops every trace of `other`
    pub fn forget(&self, other: &StateOther) {
        self.live.write().remove(other);
        self.retired.write().remove(other);
    }

    /// Owner of a closed stateid that has not been forgotten yet
    pub fn retired_owner(&self, other: &StateOther) -> Option<OpenOwner4> {
        self.retired.read().get(other).cloned()
    }
}
