//! Share reservation arbitration
use crate::nfs4::ops::{ShareAccess, ShareDeny};

/// An access/deny pair, held by one open or aggregated over many
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ShareReservation {
    pub access: ShareAccess,
    pub deny: ShareDeny,
}

impl ShareReservation {
    pub const fn new(access: ShareAccess, deny: ShareDeny) -> Self {
        ShareReservation { access, deny }
    }

    pub const fn union(self, other: ShareReservation) -> ShareReservation {
        ShareReservation {
            access: self.access.union(other.access),
            deny: self.deny.union(other.deny),
        }
    }

    /// Both masks of `other` are covered by this reservation
    pub const fn contains(&self, other: &ShareReservation) -> bool {
        self.access.contains(other.access) && self.deny.contains(other.deny)
    }

    /// OR-reduction over a set of reservations
    pub fn aggregate<'a>(all: impl IntoIterator<Item = &'a ShareReservation>) -> Self {
        all.into_iter()
            .fold(ShareReservation::default(), |acc, r| acc.union(*r))
    }
}

impl core::fmt::Display for ShareReservation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "access={}, deny={}", self.access, self.deny)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Conflict,
}

/// Decides whether `requested` may join a file whose granted opens
/// OR together to `aggregate`.
///
/// The aggregate includes every open on the file, the requester's own
/// included.
pub fn evaluate(aggregate: &ShareReservation, requested: &ShareReservation) -> Admission {
    let conflict = requested.access.bits() & aggregate.deny.bits() != 0
        || requested.deny.bits() & aggregate.access.bits() != 0;

    if conflict {
        Admission::Conflict
    } else {
        Admission::Admit
    }
}
