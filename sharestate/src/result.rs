use thiserror::Error;

/// RFC 7530 status codes for the outcomes this engine produces
pub const NFS4_OK: u32 = 0;
pub const NFS4ERR_NOENT: u32 = 2;
pub const NFS4ERR_ACCESS: u32 = 13;
pub const NFS4ERR_EXIST: u32 = 17;
pub const NFS4ERR_NOTDIR: u32 = 20;
pub const NFS4ERR_ISDIR: u32 = 21;
pub const NFS4ERR_INVAL: u32 = 22;
pub const NFS4ERR_NAMETOOLONG: u32 = 63;
pub const NFS4ERR_NOTSUPP: u32 = 10004;
pub const NFS4ERR_SERVERFAULT: u32 = 10006;
pub const NFS4ERR_LOCKED: u32 = 10012;
pub const NFS4ERR_SHARE_DENIED: u32 = 10015;
pub const NFS4ERR_NOFILEHANDLE: u32 = 10020;
pub const NFS4ERR_STALE_STATEID: u32 = 10023;
pub const NFS4ERR_OLD_STATEID: u32 = 10024;
pub const NFS4ERR_BAD_STATEID: u32 = 10025;
pub const NFS4ERR_BAD_SEQID: u32 = 10026;
pub const NFS4ERR_SYMLINK: u32 = 10029;
pub const NFS4ERR_ATTRNOTSUPP: u32 = 10032;
pub const NFS4ERR_NO_GRACE: u32 = 10033;
pub const NFS4ERR_RECLAIM_BAD: u32 = 10034;
pub const NFS4ERR_OPENMODE: u32 = 10038;

/// Per-request failure returned by the open-state engine.
///
/// None of these are fatal to the server; each is the outcome of a
/// single request and is returned synchronously to the caller.
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NfsError {
    /// Requested share reservation conflicts with the file's current opens
    #[error("share reservation denied")]
    ShareDenied,
    /// Owner seqid is neither the expected value nor a replay
    #[error("bad seqid")]
    BadSeqid,
    /// GUARDED create of an existing name, or EXCLUSIVE verifier mismatch
    #[error("file exists")]
    AlreadyExists,
    /// Permission bits forbid the requested access
    #[error("access denied")]
    AccessDenied,
    /// I/O attempted without a compatible share reservation
    #[error("locked")]
    Locked,
    /// No current filehandle
    #[error("no current filehandle")]
    NoFileHandle,
    #[error("invalid argument")]
    Invalid,
    #[error("attribute not supported")]
    AttrNotSupp,
    #[error("not a directory")]
    NotDir,
    #[error("name too long")]
    NameTooLong,
    #[error("is a directory")]
    IsDir,
    #[error("symbolic link")]
    SymlinkNotSupported,
    #[error("no such file or directory")]
    NoEnt,
    /// CLAIM_PREVIOUS during grace with nothing to reclaim
    #[error("reclaim bad")]
    ReclaimBad,
    /// CLAIM_PREVIOUS outside the grace period
    #[error("no grace")]
    NoGrace,
    #[error("operation not supported")]
    NotSupported,
    /// Stateid was not issued by this server, or has been closed
    #[error("bad stateid")]
    BadStateid,
    /// Stateid seqid lags behind the open's current seqid
    #[error("old stateid")]
    OldStateid,
    /// Stateid was issued by an earlier server instance
    #[error("stale stateid")]
    StaleStateid,
    /// Stateid's share access does not cover the I/O
    #[error("open mode")]
    OpenMode,
    /// Indicates a bug in this crate
    #[error("server fault")]
    ServerFault,
}

impl NfsError {
    /// Returns the NFS4 status code
    pub const fn code(&self) -> u32 {
        match self {
            NfsError::ShareDenied => NFS4ERR_SHARE_DENIED,
            NfsError::BadSeqid => NFS4ERR_BAD_SEQID,
            NfsError::AlreadyExists => NFS4ERR_EXIST,
            NfsError::AccessDenied => NFS4ERR_ACCESS,
            NfsError::Locked => NFS4ERR_LOCKED,
            NfsError::NoFileHandle => NFS4ERR_NOFILEHANDLE,
            NfsError::Invalid => NFS4ERR_INVAL,
            NfsError::AttrNotSupp => NFS4ERR_ATTRNOTSUPP,
            NfsError::NotDir => NFS4ERR_NOTDIR,
            NfsError::NameTooLong => NFS4ERR_NAMETOOLONG,
            NfsError::IsDir => NFS4ERR_ISDIR,
            NfsError::SymlinkNotSupported => NFS4ERR_SYMLINK,
            NfsError::NoEnt => NFS4ERR_NOENT,
            NfsError::ReclaimBad => NFS4ERR_RECLAIM_BAD,
            NfsError::NoGrace => NFS4ERR_NO_GRACE,
            NfsError::NotSupported => NFS4ERR_NOTSUPP,
            NfsError::BadStateid => NFS4ERR_BAD_STATEID,
            NfsError::OldStateid => NFS4ERR_OLD_STATEID,
            NfsError::StaleStateid => NFS4ERR_STALE_STATEID,
            NfsError::OpenMode => NFS4ERR_OPENMODE,
            NfsError::ServerFault => NFS4ERR_SERVERFAULT,
        }
    }

    /// Maps an NFS4 status code back to the error, `None` for `NFS4_OK`
    /// and for codes this engine never produces.
    pub fn from_code(code: u32) -> Option<NfsError> {
        const ALL: [NfsError; 21] = [
            NfsError::ShareDenied,
            NfsError::BadSeqid,
            NfsError::AlreadyExists,
            NfsError::AccessDenied,
            NfsError::Locked,
            NfsError::NoFileHandle,
            NfsError::Invalid,
            NfsError::AttrNotSupp,
            NfsError::NotDir,
            NfsError::NameTooLong,
            NfsError::IsDir,
            NfsError::SymlinkNotSupported,
            NfsError::NoEnt,
            NfsError::ReclaimBad,
            NfsError::NoGrace,
            NfsError::NotSupported,
            NfsError::BadStateid,
            NfsError::OldStateid,
            NfsError::StaleStateid,
            NfsError::OpenMode,
            NfsError::ServerFault,
        ];

        ALL.into_iter().find(|e| e.code() == code)
    }

    /// Whether the owner's seqid moves forward when a request fails with
    /// this error (RFC 7530 section 9.1.7). Errors that do not advance it
    /// are also never cached for replay.
    pub const fn advances_seqid(&self) -> bool {
        !matches!(
            self,
            NfsError::BadSeqid
                | NfsError::BadStateid
                | NfsError::StaleStateid
                | NfsError::NoFileHandle
        )
    }
}

pub type Result<T> = std::result::Result<T, NfsError>;

/// Status code of a complete operation result
pub fn status<T>(result: &Result<T>) -> u32 {
    match result {
        Ok(_) => NFS4_OK,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        assert_eq!(NfsError::from_code(10015), Some(NfsError::ShareDenied));
        assert_eq!(NfsError::from_code(NFS4_OK), None);
        assert_eq!(NfsError::AlreadyExists.code(), 17);
        assert_eq!(status::<()>(&Ok(())), NFS4_OK);
        assert_eq!(status::<()>(&Err(NfsError::BadSeqid)), NFS4ERR_BAD_SEQID);
    }

    #[test]
    fn seqid_advancing_errors() {
        assert!(NfsError::ShareDenied.advances_seqid());
        assert!(NfsError::AlreadyExists.advances_seqid());
        assert!(!NfsError::BadSeqid.advances_seqid());
        assert!(!NfsError::BadStateid.advances_seqid());
        assert!(!NfsError::NoFileHandle.advances_seqid());
    }
}
