//! Per-owner request ordering and replay detection
use super::owner::OpenOwner;
use crate::{
    nfs4::ops::{
        Close4ResOk, Open4ResOk, OpenConfirm4ResOk, OpenDowngrade4ResOk, ResultOp4, SequenceId4,
    },
    result::{NfsError, Result},
};
use bytes::Bytes;
use tracing::{debug, warn};

/// Outcome of checking a request's seqid against its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeqidCheck {
    /// New request, execute it
    Proceed,
    /// Retransmission of the previous request; return the cached reply
    /// without executing anything
    Replay(ResultOp4),
}

/// Validates `seqid` for `owner`. A `BadSeqid` rejection leaves the
/// owner untouched.
pub fn check(owner: &OpenOwner, seqid: SequenceId4, request: &Bytes) -> Result<SeqidCheck> {
    if seqid == owner.next_seqid {
        return Ok(SeqidCheck::Proceed);
    }

    if seqid == owner.last_request_seqid() {
        if let (Some(last), Some(reply)) = (&owner.last_request, &owner.last_response) {
            if last == request {
                return Ok(SeqidCheck::Replay(reply.clone()));
            }
        }
    }

    warn!(
        owner = ?owner.id,
        seqid,
        expected = owner.next_seqid,
        "seqid out of sequence"
    );
    Err(NfsError::BadSeqid)
}

/// Records the completion of a request that passed [`check`]
pub fn complete(owner: &mut OpenOwner, seqid: SequenceId4, request: Bytes, reply: ResultOp4) {
    owner.next_seqid = seqid.wrapping_add(1);
    owner.last_request = Some(request);
    owner.last_response = Some(reply);
}

/// Replies that can sit in an owner's replay cache
pub trait SequencedReply: Sized + Clone {
    fn into_op(result: Result<Self>) -> ResultOp4;

    fn from_op(op: ResultOp4) -> Option<Result<Self>>;
}

macro_rules! sequenced_reply {
    ($type:ty, $variant:ident) => {
        impl SequencedReply for $type {
            fn into_op(result: Result<Self>) -> ResultOp4 {
                ResultOp4::$variant(result)
            }

            fn from_op(op: ResultOp4) -> Option<Result<Self>> {
                match op {
                    ResultOp4::$variant(result) => Some(result),
                    _ => None,
                }
            }
        }
    };
}

sequenced_reply!(Open4ResOk, Open);
sequenced_reply!(Close4ResOk, Close);
sequenced_reply!(OpenConfirm4ResOk, OpenConfirm);
sequenced_reply!(OpenDowngrade4ResOk, OpenDowngrade);

/// Runs `exec` under seqid discipline.
///
/// Replays return the cached reply. New requests execute, and their
/// outcome is cached and advances the seqid unless the error is one
/// that leaves the seqid where it was.
pub fn run<T, F>(owner: &mut OpenOwner, seqid: SequenceId4, request: Bytes, exec: F) -> Result<T>
where
    T: SequencedReply,
    F: FnOnce(&mut OpenOwner) -> Result<T>,
{
    match check(owner, seqid, &request)? {
        SeqidCheck::Replay(reply) => {
            debug!(owner = ?owner.id, seqid, status = reply.status(), "replaying cached reply");
            return T::from_op(reply).unwrap_or(Err(NfsError::ServerFault));
        }
        SeqidCheck::Proceed => {}
    }

    let result = exec(owner);
    let advances = match &result {
        Ok(_) => true,
        Err(e) => e.advances_seqid(),
    };

    if advances {
        complete(owner, seqid, request, T::into_op(result.clone()));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfs4::ops::{OpenOwner4, StateId4};

    fn owner(first_seqid: SequenceId4) -> OpenOwner {
        OpenOwner::new(OpenOwner4::new(1, &b"o"[..]), first_seqid)
    }

    fn close_reply(seqid: u32) -> Close4ResOk {
        Close4ResOk {
            open_stateid: StateId4 {
                seqid,
                other: [9; 12],
            },
        }
    }

    #[test]
    fn new_request_advances() {
        let mut owner = owner(5);
        let reply = run(&mut owner, 5, Bytes::from_static(b"req"), |_| Ok(close_reply(2)));
        assert_eq!(reply, Ok(close_reply(2)));
        assert_eq!(owner.next_seqid, 6);
    }

    #[test]
    fn replay_returns_cached_without_executing() {
        let mut owner = owner(5);
        run(&mut owner, 5, Bytes::from_static(b"req"), |_| Ok(close_reply(2))).unwrap();

        let reply = run::<Close4ResOk, _>(&mut owner, 5, Bytes::from_static(b"req"), |_| {
            panic!("replay must not execute")
        });
        assert_eq!(reply, Ok(close_reply(2)));
        assert_eq!(owner.next_seqid, 6);
    }

    #[test]
    fn previous_seqid_with_different_request_is_bad() {
        let mut owner = owner(5);
        run(&mut owner, 5, Bytes::from_static(b"req"), |_| Ok(close_reply(2))).unwrap();

        let reply = run(&mut owner, 5, Bytes::from_static(b"other"), |_| Ok(close_reply(3)));
        assert_eq!(reply, Err(NfsError::BadSeqid));
        assert_eq!(owner.next_seqid, 6);
    }

    #[test]
    fn skipped_seqid_is_bad_and_leaves_owner_alone() {
        let mut owner = owner(5);
        let reply = run(&mut owner, 6, Bytes::from_static(b"req"), |_| Ok(close_reply(2)));
        assert_eq!(reply, Err(NfsError::BadSeqid));
        assert_eq!(owner.next_seqid, 5);
        assert!(owner.last_request.is_none());
    }

    #[test]
    fn failures_are_cached_too() {
        let mut owner = owner(5);
        let first = run::<Close4ResOk, _>(&mut owner, 5, Bytes::from_static(b"req"), |_| {
            Err(NfsError::ShareDenied)
        });
        assert_eq!(first, Err(NfsError::ShareDenied));
        assert_eq!(owner.next_seqid, 6);
        assert_eq!(
            owner.last_response.as_ref().map(ResultOp4::status),
            Some(NfsError::ShareDenied.code())
        );

        let replay = run::<Close4ResOk, _>(&mut owner, 5, Bytes::from_static(b"req"), |_| {
            Ok(close_reply(1))
        });
        assert_eq!(replay, Err(NfsError::ShareDenied));
    }

    #[test]
    fn non_advancing_errors_are_not_cached() {
        let mut owner = owner(5);
        let first = run::<Close4ResOk, _>(&mut owner, 5, Bytes::from_static(b"req"), |_| {
            Err(NfsError::BadStateid)
        });
        assert_eq!(first, Err(NfsError::BadStateid));
        assert_eq!(owner.next_seqid, 5);
        assert!(owner.last_response.is_none());
    }

    #[test]
    fn seqid_wraps() {
        let mut owner = owner(u32::MAX);
        run(&mut owner, u32::MAX, Bytes::from_static(b"req"), |_| Ok(close_reply(1))).unwrap();
        assert_eq!(owner.next_seqid, 0);
        assert_eq!(owner.last_request_seqid(), u32::MAX);
    }
}
