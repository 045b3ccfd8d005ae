/// NFS4 open-state operations
use crate::{fs::FileId, result::NfsError};
use sharestate_macros::PackTo;

pub use super::attr::{Bitmap4, FileAttributes, NfsType4};

pub_use!(types);

pub const OP_CLOSE: u32 = 4;
pub const OP_OPEN: u32 = 18;
pub const OP_OPEN_CONFIRM: u32 = 20;
pub const OP_OPEN_DOWNGRADE: u32 = 21;

pub const OPEN4_SHARE_ACCESS_READ: u32 = 0x00000001;
pub const OPEN4_SHARE_ACCESS_WRITE: u32 = 0x00000002;
pub const OPEN4_SHARE_ACCESS_BOTH: u32 = 0x00000003;

pub const OPEN4_SHARE_DENY_NONE: u32 = 0x00000000;
pub const OPEN4_SHARE_DENY_READ: u32 = 0x00000001;
pub const OPEN4_SHARE_DENY_WRITE: u32 = 0x00000002;
pub const OPEN4_SHARE_DENY_BOTH: u32 = 0x00000003;

/// Owner-sequenced operations
#[derive(PackTo, Debug, Clone, PartialEq, Eq)]
pub enum ArgOp4 {
    #[xdr(OP_CLOSE)] // 4
    Close(Close4Args),

    #[xdr(OP_OPEN)] // 18
    Open(Open4Args),

    #[xdr(OP_OPEN_CONFIRM)] // 20
    OpenConfirm(OpenConfirm4Args),

    #[xdr(OP_OPEN_DOWNGRADE)] // 21
    OpenDowngrade(OpenDowngrade4Args),
}

/// A sequenced operation together with the current filehandle it was
/// evaluated against. Its packed image identifies a retransmission.
#[derive(PackTo, Debug)]
pub struct SequencedRequest {
    pub current_fh: Option<FileId>,
    pub op: ArgOp4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultOp4 {
    Close(core::result::Result<Close4ResOk, NfsError>),
    Open(core::result::Result<Open4ResOk, NfsError>),
    OpenConfirm(core::result::Result<OpenConfirm4ResOk, NfsError>),
    OpenDowngrade(core::result::Result<OpenDowngrade4ResOk, NfsError>),
}

impl ResultOp4 {
    pub fn status(&self) -> u32 {
        match self {
            ResultOp4::Close(r) => crate::result::status(r),
            ResultOp4::Open(r) => crate::result::status(r),
            ResultOp4::OpenConfirm(r) => crate::result::status(r),
            ResultOp4::OpenDowngrade(r) => crate::result::status(r),
        }
    }
}

pub_use!(open, close, open_confirm, open_downgrade);
