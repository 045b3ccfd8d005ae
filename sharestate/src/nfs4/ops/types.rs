use crate::xdr::{PackTo, Packer};
use bytes::Bytes;
use sharestate_macros::PackTo;

pub const NFS4_VERIFIER_SIZE: usize = 8;
pub const NFS4_OTHER_SIZE: usize = 12;

pub type SequenceId4 = u32;
pub type ClientId4 = u64;
pub type ChangeId4 = u64;

/// Client-chosen opaque value for exclusive creation, compared only
/// for equality
#[derive(PackTo, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Verifier4(pub [u8; NFS4_VERIFIER_SIZE]);

impl From<&[u8; NFS4_VERIFIER_SIZE]> for Verifier4 {
    fn from(bytes: &[u8; NFS4_VERIFIER_SIZE]) -> Self {
        Verifier4(*bytes)
    }
}

/// Handle for one granted open.
///
/// `other` identifies the open for its whole life; `seqid` moves
/// forward on every change made through it.
#[derive(PackTo, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId4 {
    pub seqid: u32,
    pub other: [u8; NFS4_OTHER_SIZE],
}

impl StateId4 {
    /// The all-zero special stateid
    pub const ANONYMOUS: StateId4 = StateId4 {
        seqid: 0,
        other: [0; NFS4_OTHER_SIZE],
    };

    /// The all-ones special stateid; READ through it bypasses share
    /// deny checks
    pub const READ_BYPASS: StateId4 = StateId4 {
        seqid: u32::MAX,
        other: [0xff; NFS4_OTHER_SIZE],
    };

    pub fn is_anonymous(&self) -> bool {
        *self == Self::ANONYMOUS
    }

    pub fn is_read_bypass(&self) -> bool {
        *self == Self::READ_BYPASS
    }

    /// Either special stateid; neither names an open
    pub fn is_special(&self) -> bool {
        self.is_anonymous() || self.is_read_bypass()
    }
}

/// An open-owner: a client's sequencing scope for OPEN/CLOSE
#[derive(PackTo, Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpenOwner4 {
    pub client_id: ClientId4,
    pub owner: Bytes,
}

impl OpenOwner4 {
    pub fn new(client_id: ClientId4, owner: impl Into<Bytes>) -> Self {
        OpenOwner4 {
            client_id,
            owner: owner.into(),
        }
    }
}

#[derive(PackTo, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeInfo4 {
    pub atomic: bool,
    pub before: ChangeId4,
    pub after: ChangeId4,
}

#[derive(PackTo, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenDelegationType4 {
    None = 0,
    Read = 1,
    Write = 2,
}

#[derive(PackTo, Debug, Clone, PartialEq, Eq)]
pub enum OpenDelegation4 {
    None,
}

macro_rules! share_bits {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name(u32);

        impl $name {
            pub const NONE: $name = $name(0);
            pub const READ: $name = $name(1);
            pub const WRITE: $name = $name(2);
            pub const BOTH: $name = $name(3);

            pub const fn bits(&self) -> u32 {
                self.0
            }

            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }

            /// All bits of `other` are set in `self`
            pub const fn contains(&self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn union(self, other: $name) -> $name {
                $name(self.0 | other.0)
            }

            pub fn name(&self) -> &'static str {
                match self.0 {
                    0 => "NONE",
                    1 => "READ",
                    2 => "WRITE",
                    _ => "BOTH",
                }
            }
        }

        impl core::ops::BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                self.union(rhs)
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                *self = self.union(rhs);
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl<B: Packer> PackTo<B> for $name {
            fn pack_to(&self, buf: &mut B) {
                buf.pack_uint(self.0)
            }
        }
    };
}

share_bits!(
    /// OPEN4_SHARE_ACCESS_* bits, a set over {READ, WRITE}
    ShareAccess
);
share_bits!(
    /// OPEN4_SHARE_DENY_* bits, a set over {READ, WRITE}
    ShareDeny
);

impl ShareAccess {
    /// Parses share_access off an OPEN; no access at all is invalid
    pub fn from_wire(bits: u32) -> Option<ShareAccess> {
        match bits {
            1..=3 => Some(ShareAccess(bits)),
            _ => None,
        }
    }
}

impl ShareDeny {
    pub fn from_wire(bits: u32) -> Option<ShareDeny> {
        match bits {
            0..=3 => Some(ShareDeny(bits)),
            _ => None,
        }
    }
}

/// I/O checked against share reservations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Read,
    Write,
}

impl IoKind {
    pub fn access(&self) -> ShareAccess {
        match self {
            IoKind::Read => ShareAccess::READ,
            IoKind::Write => ShareAccess::WRITE,
        }
    }

    pub fn deny(&self) -> ShareDeny {
        match self {
            IoKind::Read => ShareDeny::READ,
            IoKind::Write => ShareDeny::WRITE,
        }
    }
}
