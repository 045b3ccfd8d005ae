use super::{
    Bitmap4, ChangeInfo4, FileAttributes, OpenDelegation4, OpenDelegationType4, OpenOwner4,
    SequenceId4, StateId4, Verifier4,
};
use crate::fs::FileId;
use bytes::Bytes;
use sharestate_macros::PackTo;

/// Owner must confirm with OPEN_CONFIRM before the open is usable
pub const OPEN4_RESULT_CONFIRM: u32 = 0x00000002;
pub const OPEN4_RESULT_LOCKTYPE_POSIX: u32 = 0x00000004;

#[derive(PackTo, Debug, Clone, PartialEq, Eq)]
pub enum OpenFlag4 {
    NoCreate,
    Create(CreateHow4),
}

#[derive(PackTo, Debug, Clone, PartialEq, Eq)]
pub enum CreateHow4 {
    Unchecked(FileAttributes),
    Guarded(FileAttributes),
    Exclusive(Verifier4),
}

#[derive(PackTo, Debug, Clone, PartialEq, Eq)]
pub struct OpenClaimDelegateCur4 {
    pub delegate_stateid: StateId4,
    pub file: Bytes,
}

/// Basis of an OPEN. Names travel as raw bytes so that invalid UTF-8
/// can be rejected by the server rather than the decoder.
#[derive(PackTo, Debug, Clone, PartialEq, Eq)]
pub enum OpenClaim4 {
    #[xdr(0)]
    Null(Bytes),
    #[xdr(1)]
    Previous(OpenDelegationType4),
    #[xdr(2)]
    DelegateCur(OpenClaimDelegateCur4),
    #[xdr(3)]
    DelegatePrev(Bytes),
}

impl OpenClaim4 {
    pub fn null(name: &str) -> Self {
        OpenClaim4::Null(Bytes::copy_from_slice(name.as_bytes()))
    }
}

#[derive(PackTo, Debug, Clone, PartialEq, Eq)]
pub struct Open4Args {
    pub seqid: SequenceId4,
    pub share_access: u32,
    pub share_deny: u32,
    pub owner: OpenOwner4,
    pub how: OpenFlag4,
    pub claim: OpenClaim4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Open4ResOk {
    pub state_id: StateId4,
    /// Object the open was granted on, what GETFH would return next
    pub file: FileId,
    pub change_info: ChangeInfo4,
    pub result_flags: u32,
    pub attr_set: Bitmap4,
    pub delegation: OpenDelegation4,
}
