//! Per-file open state
use super::{
    share::{self, Admission, ShareReservation},
    stateid::{StateOther, StateidIssuer},
};
use crate::{
    fs::FileId,
    nfs4::ops::{IoKind, OpenOwner4, StateId4},
    result::{NfsError, Result},
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Basis an open was granted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimType {
    Null,
    Previous,
}

/// An open about to be admitted; it only exists inside the critical
/// section that decides it.
#[derive(Debug, Clone)]
pub struct PendingOpen {
    pub owner: OpenOwner4,
    pub share: ShareReservation,
    pub claim: ClaimType,
}

/// One granted open instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRecord {
    pub stateid: StateId4,
    pub owner: OpenOwner4,
    pub file: FileId,
    pub share: ShareReservation,
    pub claim: ClaimType,
}

/// Result of an OPEN against the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Granted {
    pub stateid: StateId4,
    /// The owner's record as it was before being widened, `None` when a
    /// new record was created
    pub previous: Option<OpenRecord>,
}

impl Granted {
    pub fn is_new(&self) -> bool {
        self.previous.is_none()
    }
}

#[derive(Default)]
struct FileOpenState {
    records: BTreeMap<StateOther, OpenRecord>,
    aggregate: ShareReservation,
    /// Detached from the table; a caller holding this state must look
    /// the file up again
    retired: bool,
}

impl FileOpenState {
    fn recompute(&mut self) {
        self.aggregate = ShareReservation::aggregate(self.records.values().map(|r| &r.share));
    }

    fn aggregate_except(&self, other: &StateOther) -> ShareReservation {
        ShareReservation::aggregate(
            self.records
                .iter()
                .filter(|(k, _)| *k != other)
                .map(|(_, r)| &r.share),
        )
    }

    fn by_owner(&self, owner: &OpenOwner4) -> Option<&OpenRecord> {
        self.records.values().find(|r| &r.owner == owner)
    }

    /// Looks up the record for `stateid`, checking its seqid is current
    fn current(&mut self, stateid: &StateId4) -> Result<&mut OpenRecord> {
        let record = self
            .records
            .get_mut(&stateid.other)
            .ok_or(NfsError::BadStateid)?;

        if stateid.seqid > record.stateid.seqid {
            Err(NfsError::BadStateid)
        } else if stateid.seqid < record.stateid.seqid {
            Err(NfsError::OldStateid)
        } else {
            Ok(record)
        }
    }

    fn insert(&mut self, record: OpenRecord) {
        self.records.insert(record.stateid.other, record);
        self.recompute();
    }
}

/// All open records, grouped per file. Each file's state is its own
/// critical section; the outer map is only locked to find or drop
/// entries.
#[derive(Default)]
pub struct FileOpenStateTable {
    files: RwLock<HashMap<FileId, Arc<Mutex<FileOpenState>>>>,
}

impl FileOpenStateTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Runs `f` inside the critical section of `file`, dropping the
    /// file's entry afterwards if no opens remain
    fn with_file<T>(&self, file: FileId, f: impl FnOnce(&mut FileOpenState) -> T) -> T {
        let (result, now_empty) = loop {
            let entry = {
                let files = self.files.read();
                files.get(&file).cloned()
            };
            let entry = match entry {
                Some(entry) => entry,
                None => self.files.write().entry(file).or_default().clone(),
            };

            let mut state = entry.lock();
            if state.retired {
                continue;
            }

            let result = f(&mut state);
            break (result, state.records.is_empty());
        };

        if now_empty {
            self.retire_if_empty(file);
        }

        result
    }

    fn retire_if_empty(&self, file: FileId) {
        let mut files = self.files.write();
        let empty = match files.get(&file) {
            Some(entry) => {
                let mut state = entry.lock();
                if state.records.is_empty() {
                    state.retired = true;
                }
                state.retired
            }
            None => false,
        };

        if empty {
            files.remove(&file);
        }
    }

    /// Admits `pending` against every open on `file` and records it
    pub fn admit(
        &self,
        file: FileId,
        pending: PendingOpen,
        issuer: &StateidIssuer,
    ) -> Result<OpenRecord> {
        self.with_file(file, |state| admit_in(state, file, pending, issuer))
    }

    /// OPEN semantics: the request is checked against the full aggregate,
    /// the owner's own opens included. When the owner already holds an
    /// open on the file that open is widened in place, otherwise a new
    /// record is admitted.
    pub fn open(
        &self,
        file: FileId,
        pending: PendingOpen,
        issuer: &StateidIssuer,
    ) -> Result<Granted> {
        self.with_file(file, |state| {
            if share::evaluate(&state.aggregate, &pending.share) == Admission::Conflict {
                debug!(?file, requested = %pending.share, aggregate = %state.aggregate, "share denied");
                return Err(NfsError::ShareDenied);
            }

            match state.by_owner(&pending.owner).cloned() {
                Some(previous) => {
                    let stateid = upgrade_in(state, &previous.stateid, pending.share)?;
                    Ok(Granted {
                        stateid,
                        previous: Some(previous),
                    })
                }
                None => {
                    let record = admit_in(state, file, pending, issuer)?;
                    Ok(Granted {
                        stateid: record.stateid,
                        previous: None,
                    })
                }
            }
        })
    }

    /// Puts the open named by `stateid` back to `previous`, undoing a
    /// widening whose OPEN failed afterwards
    pub fn restore(&self, file: FileId, stateid: &StateId4, previous: &OpenRecord) -> Result<()> {
        self.with_file(file, |state| {
            let record = state.current(stateid)?;
            record.share = previous.share;
            record.stateid.seqid = previous.stateid.seqid;
            state.recompute();
            info!(?file, stateid = ?previous.stateid, share = %previous.share, "open restored");

            Ok(())
        })
    }

    /// Widens the open named by `stateid` to the union of its current
    /// masks and `share`, judged against every other open on the file
    pub fn upgrade(
        &self,
        file: FileId,
        stateid: &StateId4,
        share: ShareReservation,
    ) -> Result<StateId4> {
        self.with_file(file, |state| upgrade_in(state, stateid, share))
    }

    /// Narrows the open named by `stateid` to `share`, which must be a
    /// subset of what it holds
    pub fn downgrade(
        &self,
        file: FileId,
        stateid: &StateId4,
        share: ShareReservation,
    ) -> Result<StateId4> {
        self.with_file(file, |state| {
            let record = state.current(stateid)?;
            if !record.share.contains(&share) || share.access.is_empty() {
                return Err(NfsError::Invalid);
            }

            record.share = share;
            record.stateid.seqid = record.stateid.seqid.wrapping_add(1);
            let stateid = record.stateid;
            state.recompute();
            info!(?file, ?stateid, share = %share, "open downgraded");

            Ok(stateid)
        })
    }

    /// Moves the stateid seqid of an open forward without touching its
    /// reservation
    pub fn bump(&self, file: FileId, stateid: &StateId4) -> Result<StateId4> {
        self.with_file(file, |state| {
            let record = state.current(stateid)?;
            record.stateid.seqid = record.stateid.seqid.wrapping_add(1);
            Ok(record.stateid)
        })
    }

    /// Deletes the open named by `stateid` and recomputes the aggregate
    /// from what remains
    pub fn remove(&self, file: FileId, stateid: &StateId4) -> Result<OpenRecord> {
        self.with_file(file, |state| {
            state.current(stateid)?;
            let record = state
                .records
                .remove(&stateid.other)
                .ok_or(NfsError::BadStateid)?;
            state.recompute();
            info!(?file, stateid = ?record.stateid, "open closed");

            Ok(record)
        })
    }

    /// Deletes every open held by `owner`, whatever their seqids
    pub fn revoke_owner(&self, owner: &OpenOwner4) -> Vec<OpenRecord> {
        let files: Vec<FileId> = self.files.read().keys().copied().collect();
        let mut revoked = Vec::new();
        for file in files {
            self.with_file(file, |state| {
                let keys: Vec<StateOther> = state
                    .records
                    .iter()
                    .filter(|(_, r)| &r.owner == owner)
                    .map(|(k, _)| *k)
                    .collect();
                for key in keys {
                    if let Some(record) = state.records.remove(&key) {
                        revoked.push(record);
                    }
                }
                state.recompute();
            });
        }

        revoked
    }

    /// Current record for `stateid`, seqid checked
    pub fn get(&self, file: FileId, stateid: &StateId4) -> Result<OpenRecord> {
        self.with_file(file, |state| state.current(stateid).map(|r| r.clone()))
    }

    /// OR of the reservations of every open on `file`
    pub fn aggregate(&self, file: FileId) -> ShareReservation {
        self.with_file(file, |state| state.aggregate)
    }

    pub fn records(&self, file: FileId) -> Vec<OpenRecord> {
        self.with_file(file, |state| state.records.values().cloned().collect())
    }

    /// Whether I/O of kind `io` is compatible with the opens on `file`.
    ///
    /// The anonymous stateid passes unless some open denies the I/O.
    /// The read-bypass stateid passes any READ and no WRITE.
    /// A real stateid must hold the access itself (READ is also allowed
    /// under WRITE access) and no other open may deny it.
    pub fn check_io(&self, file: FileId, stateid: &StateId4, io: IoKind) -> Result<()> {
        if stateid.is_read_bypass() {
            return match io {
                IoKind::Read => Ok(()),
                IoKind::Write => Err(NfsError::BadStateid),
            };
        }

        self.with_file(file, |state| {
            if stateid.is_anonymous() {
                return if state.aggregate.deny.contains(io.deny()) {
                    Err(NfsError::Locked)
                } else {
                    Ok(())
                };
            }

            let record = state.current(stateid)?;
            let permitted = match io {
                IoKind::Read => !record.share.access.is_empty(),
                IoKind::Write => record.share.access.contains(io.access()),
            };
            if !permitted {
                return Err(NfsError::OpenMode);
            }

            if state.aggregate_except(&stateid.other).deny.contains(io.deny()) {
                return Err(NfsError::Locked);
            }

            Ok(())
        })
    }
}

fn admit_in(
    state: &mut FileOpenState,
    file: FileId,
    pending: PendingOpen,
    issuer: &StateidIssuer,
) -> Result<OpenRecord> {
    if share::evaluate(&state.aggregate, &pending.share) == Admission::Conflict {
        debug!(?file, requested = %pending.share, aggregate = %state.aggregate, "share denied");
        return Err(NfsError::ShareDenied);
    }

    let record = OpenRecord {
        stateid: issuer.issue(file, &pending.owner),
        owner: pending.owner,
        file,
        share: pending.share,
        claim: pending.claim,
    };
    state.insert(record.clone());
    info!(?file, stateid = ?record.stateid, share = %record.share, "open granted");

    Ok(record)
}

fn upgrade_in(
    state: &mut FileOpenState,
    stateid: &StateId4,
    share: ShareReservation,
) -> Result<StateId4> {
    let others = state.aggregate_except(&stateid.other);
    let record = state.current(stateid)?;
    let widened = record.share.union(share);

    if share::evaluate(&others, &widened) == Admission::Conflict {
        return Err(NfsError::ShareDenied);
    }

    record.share = widened;
    record.stateid.seqid = record.stateid.seqid.wrapping_add(1);
    let stateid = record.stateid;
    state.recompute();
    info!(?stateid, share = %widened, "open upgraded");

    Ok(stateid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfs4::ops::{ShareAccess, ShareDeny};
    use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

    const FILE: FileId = FileId(10);

    fn owner(name: &str) -> OpenOwner4 {
        OpenOwner4::new(1, name.as_bytes().to_vec())
    }

    fn pending(name: &str, access: ShareAccess, deny: ShareDeny) -> PendingOpen {
        PendingOpen {
            owner: owner(name),
            share: ShareReservation::new(access, deny),
            claim: ClaimType::Null,
        }
    }

    #[test]
    fn admit_then_conflict() {
        let table = FileOpenStateTable::new();
        let issuer = StateidIssuer::new(1);

        table
            .admit(FILE, pending("a", ShareAccess::BOTH, ShareDeny::WRITE), &issuer)
            .unwrap();
        assert_eq!(
            table.admit(FILE, pending("b", ShareAccess::WRITE, ShareDeny::NONE), &issuer),
            Err(NfsError::ShareDenied)
        );
        table
            .admit(FILE, pending("b", ShareAccess::READ, ShareDeny::NONE), &issuer)
            .unwrap();

        assert_eq!(
            table.aggregate(FILE),
            ShareReservation::new(ShareAccess::BOTH, ShareDeny::WRITE)
        );
    }

    #[test]
    fn files_are_independent() {
        let table = FileOpenStateTable::new();
        let issuer = StateidIssuer::new(1);

        table
            .admit(FILE, pending("a", ShareAccess::BOTH, ShareDeny::BOTH), &issuer)
            .unwrap();
        table
            .admit(FileId(11), pending("b", ShareAccess::BOTH, ShareDeny::BOTH), &issuer)
            .unwrap();
    }

    #[test]
    fn same_owner_is_not_exempt() {
        let table = FileOpenStateTable::new();
        let issuer = StateidIssuer::new(1);

        table
            .open(FILE, pending("a", ShareAccess::BOTH, ShareDeny::READ), &issuer)
            .unwrap();
        assert_eq!(
            table.open(FILE, pending("a", ShareAccess::READ, ShareDeny::NONE), &issuer),
            Err(NfsError::ShareDenied)
        );
    }

    #[test]
    fn upgrades_merge_into_one_record() {
        let table = FileOpenStateTable::new();
        let issuer = StateidIssuer::new(1);

        let first = table
            .open(FILE, pending("a", ShareAccess::READ, ShareDeny::NONE), &issuer)
            .unwrap();
        assert!(first.is_new());

        let second = table
            .open(FILE, pending("a", ShareAccess::WRITE, ShareDeny::NONE), &issuer)
            .unwrap();
        assert!(!second.is_new());
        assert_eq!(second.stateid.other, first.stateid.other);
        assert_eq!(second.stateid.seqid, first.stateid.seqid + 1);

        let third = table
            .open(FILE, pending("a", ShareAccess::BOTH, ShareDeny::NONE), &issuer)
            .unwrap();
        assert_eq!(table.records(FILE).len(), 1);
        assert_eq!(
            table.aggregate(FILE),
            ShareReservation::new(ShareAccess::BOTH, ShareDeny::NONE)
        );

        table.remove(FILE, &third.stateid).unwrap();
        assert_eq!(table.aggregate(FILE), ShareReservation::default());
        assert!(table.records(FILE).is_empty());
    }

    #[test]
    fn upgrade_is_judged_against_others_only() {
        let table = FileOpenStateTable::new();
        let issuer = StateidIssuer::new(1);

        let mine = table
            .admit(FILE, pending("a", ShareAccess::READ, ShareDeny::WRITE), &issuer)
            .unwrap();
        table
            .admit(FILE, pending("b", ShareAccess::READ, ShareDeny::NONE), &issuer)
            .unwrap();

        // Widening my own deny to BOTH conflicts with b's READ
        assert_eq!(
            table.upgrade(
                FILE,
                &mine.stateid,
                ShareReservation::new(ShareAccess::READ, ShareDeny::READ)
            ),
            Err(NfsError::ShareDenied)
        );

        // Adding WRITE access only meets my own WRITE deny, which is exempt
        let upgraded = table
            .upgrade(
                FILE,
                &mine.stateid,
                ShareReservation::new(ShareAccess::WRITE, ShareDeny::NONE),
            )
            .unwrap();
        let record = table.get(FILE, &upgraded).unwrap();
        assert_eq!(
            record.share,
            ShareReservation::new(ShareAccess::BOTH, ShareDeny::WRITE)
        );
    }

    #[test]
    fn stale_seqids_are_rejected() {
        let table = FileOpenStateTable::new();
        let issuer = StateidIssuer::new(1);

        let granted = table
            .admit(FILE, pending("a", ShareAccess::READ, ShareDeny::NONE), &issuer)
            .unwrap();
        let bumped = table.bump(FILE, &granted.stateid).unwrap();

        assert_eq!(table.get(FILE, &granted.stateid), Err(NfsError::OldStateid));
        let mut future = bumped;
        future.seqid += 1;
        assert_eq!(table.get(FILE, &future), Err(NfsError::BadStateid));
        assert_eq!(table.remove(FILE, &granted.stateid), Err(NfsError::OldStateid));
        table.remove(FILE, &bumped).unwrap();
    }

    #[test]
    fn downgrade_must_narrow() {
        let table = FileOpenStateTable::new();
        let issuer = StateidIssuer::new(1);

        let granted = table
            .admit(FILE, pending("a", ShareAccess::BOTH, ShareDeny::BOTH), &issuer)
            .unwrap();
        assert_eq!(
            table.downgrade(
                FILE,
                &granted.stateid,
                ShareReservation::new(ShareAccess::NONE, ShareDeny::NONE)
            ),
            Err(NfsError::Invalid)
        );

        let narrowed = table
            .downgrade(
                FILE,
                &granted.stateid,
                ShareReservation::new(ShareAccess::READ, ShareDeny::WRITE),
            )
            .unwrap();
        assert_eq!(
            table.aggregate(FILE),
            ShareReservation::new(ShareAccess::READ, ShareDeny::WRITE)
        );

        assert_eq!(
            table.downgrade(
                FILE,
                &narrowed,
                ShareReservation::new(ShareAccess::BOTH, ShareDeny::NONE)
            ),
            Err(NfsError::Invalid)
        );
    }

    #[test]
    fn aggregate_after_arbitrary_close_order() {
        let reservations = [
            (ShareAccess::READ, ShareDeny::NONE),
            (ShareAccess::WRITE, ShareDeny::NONE),
            (ShareAccess::READ, ShareDeny::NONE),
            (ShareAccess::BOTH, ShareDeny::NONE),
            (ShareAccess::READ, ShareDeny::NONE),
            (ShareAccess::WRITE, ShareDeny::NONE),
        ];

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for round in 0..50 {
            let table = FileOpenStateTable::new();
            let issuer = StateidIssuer::new(1);

            let mut granted: Vec<OpenRecord> = reservations
                .iter()
                .enumerate()
                .map(|(i, (a, d))| {
                    table
                        .admit(FILE, pending(&format!("o{i}"), *a, *d), &issuer)
                        .unwrap()
                })
                .collect();
            granted.shuffle(&mut rng);

            let close_count = round % (granted.len() + 1);
            for record in &granted[..close_count] {
                table.remove(FILE, &record.stateid).unwrap();
            }

            let expected =
                ShareReservation::aggregate(granted[close_count..].iter().map(|r| &r.share));
            assert_eq!(table.aggregate(FILE), expected, "round {round}");
            assert_eq!(table.records(FILE).len(), granted.len() - close_count);
        }
    }

    #[test]
    fn io_against_share_state() {
        let table = FileOpenStateTable::new();
        let issuer = StateidIssuer::new(1);

        let writer = table
            .admit(FILE, pending("a", ShareAccess::WRITE, ShareDeny::NONE), &issuer)
            .unwrap();
        assert_eq!(table.check_io(FILE, &writer.stateid, IoKind::Read), Ok(()));
        assert_eq!(table.check_io(FILE, &writer.stateid, IoKind::Write), Ok(()));

        let reader = table
            .admit(FILE, pending("b", ShareAccess::READ, ShareDeny::READ), &issuer)
            .unwrap();
        assert_eq!(
            table.check_io(FILE, &reader.stateid, IoKind::Write),
            Err(NfsError::OpenMode)
        );
        assert_eq!(table.check_io(FILE, &reader.stateid, IoKind::Read), Ok(()));
        assert_eq!(
            table.check_io(FILE, &writer.stateid, IoKind::Read),
            Err(NfsError::Locked)
        );
        assert_eq!(
            table.check_io(FILE, &StateId4::ANONYMOUS, IoKind::Read),
            Err(NfsError::Locked)
        );
        assert_eq!(
            table.check_io(FILE, &StateId4::ANONYMOUS, IoKind::Write),
            Ok(())
        );
    }

    #[test]
    fn restore_undoes_a_widening() {
        let table = FileOpenStateTable::new();
        let issuer = StateidIssuer::new(1);

        let first = table
            .open(FILE, pending("a", ShareAccess::READ, ShareDeny::NONE), &issuer)
            .unwrap();
        let widened = table
            .open(FILE, pending("a", ShareAccess::WRITE, ShareDeny::WRITE), &issuer)
            .unwrap();
        let previous = widened.previous.clone().unwrap();
        assert_eq!(previous.stateid, first.stateid);

        table.restore(FILE, &widened.stateid, &previous).unwrap();

        let record = table.get(FILE, &first.stateid).unwrap();
        assert_eq!(
            record.share,
            ShareReservation::new(ShareAccess::READ, ShareDeny::NONE)
        );
        assert_eq!(table.aggregate(FILE), record.share);
        assert_eq!(table.get(FILE, &widened.stateid), Err(NfsError::BadStateid));
        table
            .admit(FILE, pending("b", ShareAccess::WRITE, ShareDeny::NONE), &issuer)
            .unwrap();
    }

    #[test]
    fn read_bypass_ignores_deny_but_never_writes() {
        let table = FileOpenStateTable::new();
        let issuer = StateidIssuer::new(1);

        table
            .admit(FILE, pending("a", ShareAccess::BOTH, ShareDeny::BOTH), &issuer)
            .unwrap();
        assert_eq!(
            table.check_io(FILE, &StateId4::READ_BYPASS, IoKind::Read),
            Ok(())
        );
        assert_eq!(
            table.check_io(FILE, &StateId4::READ_BYPASS, IoKind::Write),
            Err(NfsError::BadStateid)
        );
        assert_eq!(
            table.check_io(FILE, &StateId4::ANONYMOUS, IoKind::Read),
            Err(NfsError::Locked)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_exclusive_opens_admit_exactly_one() {
        let table = Arc::new(FileOpenStateTable::new());
        let issuer = Arc::new(StateidIssuer::new(1));

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let table = table.clone();
                let issuer = issuer.clone();
                tokio::spawn(async move {
                    table.admit(
                        FILE,
                        pending(&format!("o{i}"), ShareAccess::BOTH, ShareDeny::BOTH),
                        &issuer,
                    )
                })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 1);
        assert_eq!(table.records(FILE).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_open_close_keeps_aggregate_exact() {
        let table = Arc::new(FileOpenStateTable::new());
        let issuer = Arc::new(StateidIssuer::new(1));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let table = table.clone();
                let issuer = issuer.clone();
                tokio::spawn(async move {
                    let access = if i % 2 == 0 {
                        ShareAccess::READ
                    } else {
                        ShareAccess::WRITE
                    };
                    let record = table
                        .admit(FILE, pending(&format!("o{i}"), access, ShareDeny::NONE), &issuer)
                        .unwrap();
                    if i % 4 != 3 {
                        table.remove(FILE, &record.stateid).unwrap();
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        // Only owners 3, 7, 11, 15 keep their WRITE opens
        let remaining = table.records(FILE);
        assert_eq!(remaining.len(), 4);
        assert_eq!(
            table.aggregate(FILE),
            ShareReservation::new(ShareAccess::WRITE, ShareDeny::NONE)
        );
    }
}
