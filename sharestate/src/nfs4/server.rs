//! OPEN/CLOSE entry point of the open-state engine
use super::{
    attr::{self, FileAttributes},
    ops::{
        ArgOp4, ChangeInfo4, Close4Args, Close4ResOk, IoKind, Open4Args, Open4ResOk,
        OpenClaim4, OpenConfirm4Args, OpenConfirm4ResOk, OpenDelegation4, OpenDowngrade4Args,
        OpenDowngrade4ResOk, OpenOwner4, SequenceId4, SequencedRequest, ShareAccess, ShareDeny,
        StateId4, OPEN4_RESULT_CONFIRM, OPEN4_RESULT_LOCKTYPE_POSIX,
    },
    state::{
        seqid, ClaimType, CreateModeResolver, FileOpenStateTable, OpenOwner, OpenOwnerRegistry,
        OpenRecord, PendingOpen, ShareReservation, StateRef, StateidIssuer,
    },
};
use crate::{
    config::ServerConfig,
    fs::{Credentials, FileId, FileKind, Filesystem},
    result::{NfsError, Result},
    xdr,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-request state a COMPOUND carries between operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub current_fh: Option<FileId>,
    pub cred: Credentials,
}

impl Context {
    pub fn new(current_fh: FileId, cred: Credentials) -> Self {
        Context {
            current_fh: Some(current_fh),
            cred,
        }
    }

    /// A context without a current filehandle
    pub fn empty(cred: Credentials) -> Self {
        Context {
            current_fh: None,
            cred,
        }
    }
}

/// One server instance's open state over a filesystem.
///
/// Every method may be called concurrently. Requests of one open-owner
/// are serialized on that owner; opens of one file are serialized on
/// that file; nothing else is shared.
pub struct OpenStateServer {
    config: ServerConfig,
    fs: Arc<dyn Filesystem>,
    owners: OpenOwnerRegistry,
    issuer: StateidIssuer,
    table: FileOpenStateTable,
}

fn share_from_wire(access: u32, deny: u32) -> Result<ShareReservation> {
    let access = ShareAccess::from_wire(access).ok_or(NfsError::Invalid)?;
    let deny = ShareDeny::from_wire(deny).ok_or(NfsError::Invalid)?;
    Ok(ShareReservation::new(access, deny))
}

fn fingerprint(ctx: &Context, op: ArgOp4) -> Bytes {
    xdr::to_bytes(&SequencedRequest {
        current_fh: ctx.current_fh,
        op,
    })
}

impl OpenStateServer {
    pub fn new(config: ServerConfig, fs: Arc<dyn Filesystem>) -> Self {
        let epoch = config.epoch();
        info!(epoch, "open state server starting");

        OpenStateServer {
            config,
            fs,
            owners: OpenOwnerRegistry::new(),
            issuer: StateidIssuer::new(epoch),
            table: FileOpenStateTable::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn fs(&self) -> &Arc<dyn Filesystem> {
        &self.fs
    }

    pub fn epoch(&self) -> u32 {
        self.issuer.epoch()
    }

    /// OPEN: resolves or creates `claim`'s name in the current directory
    /// and grants a share reservation on the result
    pub fn open(&self, ctx: &Context, args: &Open4Args) -> Result<Open4ResOk> {
        debug!(
            current_fh = ?ctx.current_fh,
            owner = ?args.owner,
            seqid = args.seqid,
            access = args.share_access,
            deny = args.share_deny,
            how = ?args.how,
            claim = ?args.claim,
            "OPEN"
        );

        let request = fingerprint(ctx, ArgOp4::Open(args.clone()));
        loop {
            let slot = self.owners.get_or_create(&args.owner, args.seqid);
            let mut owner = slot.lock();
            // Released between lookup and lock; its opens are already
            // revoked, so start over on a fresh owner
            if owner.released {
                continue;
            }

            return seqid::run(&mut owner, args.seqid, request, |owner| {
                self.execute_open(ctx, args, owner)
            });
        }
    }

    fn execute_open(
        &self,
        ctx: &Context,
        args: &Open4Args,
        owner: &mut OpenOwner,
    ) -> Result<Open4ResOk> {
        let dir = ctx.current_fh.ok_or(NfsError::NoFileHandle)?;
        let share = share_from_wire(args.share_access, args.share_deny)?;

        let name = match &args.claim {
            OpenClaim4::Null(name) => self.check_name(name)?,
            OpenClaim4::Previous(_) => {
                // No state survives a restart, so there is never anything
                // to reclaim
                return Err(if self.config.grace_period {
                    NfsError::ReclaimBad
                } else {
                    NfsError::NoGrace
                });
            }
            OpenClaim4::DelegateCur(_) | OpenClaim4::DelegatePrev(_) => {
                return Err(NfsError::NotSupported)
            }
        };

        if self.fs.kind(dir)? != FileKind::Directory {
            return Err(NfsError::NotDir);
        }

        let before = self.fs.change(dir)?;
        let resolved = CreateModeResolver::new(self.fs.as_ref(), &self.config).resolve(
            dir,
            name,
            &args.how,
            &ctx.cred,
        )?;
        let file = resolved.file;

        match self.fs.kind(file)? {
            FileKind::Regular => {}
            FileKind::Directory => return Err(NfsError::IsDir),
            FileKind::Symlink => return Err(NfsError::SymlinkNotSupported),
            FileKind::BlockDevice | FileKind::CharDevice | FileKind::Socket | FileKind::Fifo => {
                return Err(NfsError::Invalid)
            }
        }

        if !resolved.created {
            let needed = if resolved.truncate.is_some() {
                share.access | ShareAccess::WRITE
            } else {
                share.access
            };
            self.fs.check_access(file, &ctx.cred, needed)?;
        }

        let granted = self.table.open(
            file,
            PendingOpen {
                owner: args.owner.clone(),
                share,
                claim: ClaimType::Null,
            },
            &self.issuer,
        )?;

        let mut attr_set = resolved.attr_set;
        if let Some(size) = resolved.truncate {
            if let Err(e) = self
                .fs
                .set_attrs(file, &FileAttributes::new().with_size(size))
            {
                match &granted.previous {
                    Some(previous) => self.table.restore(file, &granted.stateid, previous)?,
                    None => {
                        self.table.remove(file, &granted.stateid)?;
                        self.issuer.forget(&granted.stateid.other);
                    }
                }
                return Err(e);
            }
            attr_set.set(attr::SIZE);
        }

        let after = self.fs.change(dir)?;
        let mut result_flags = OPEN4_RESULT_LOCKTYPE_POSIX;
        if !owner.confirmed {
            result_flags |= OPEN4_RESULT_CONFIRM;
        }

        Ok(Open4ResOk {
            state_id: granted.stateid,
            file,
            change_info: ChangeInfo4 {
                atomic: after == before + u64::from(resolved.created),
                before,
                after,
            },
            result_flags,
            attr_set,
            delegation: OpenDelegation4::None,
        })
    }

    fn check_name<'a>(&self, name: &'a Bytes) -> Result<&'a str> {
        if name.is_empty() {
            return Err(NfsError::Invalid);
        }
        let name = std::str::from_utf8(name).map_err(|_| NfsError::Invalid)?;
        if name.len() > self.config.max_name_len {
            return Err(NfsError::NameTooLong);
        }

        Ok(name)
    }

    /// Finds the owner a stateid-addressed request is sequenced on. A
    /// recently closed stateid still routes to its owner so that a
    /// retransmitted CLOSE can be answered from the replay cache.
    fn owner_of(&self, stateid: &StateId4) -> Result<OpenOwner4> {
        match self.issuer.validate(stateid) {
            Ok(state) => Ok(state.owner),
            Err(e) => self.issuer.retired_owner(&stateid.other).ok_or(e),
        }
    }

    /// The live open behind `stateid`, which must be on the current
    /// filehandle
    fn current_open(&self, ctx: &Context, stateid: &StateId4) -> Result<StateRef> {
        let fh = ctx.current_fh.ok_or(NfsError::NoFileHandle)?;
        let state = self.issuer.validate(stateid)?;
        if state.file != fh {
            return Err(NfsError::BadStateid);
        }

        Ok(state)
    }

    /// Runs a stateid-addressed request under its owner's seqid discipline
    fn sequenced<T, F>(
        &self,
        stateid: &StateId4,
        seqid: SequenceId4,
        request: Bytes,
        exec: F,
    ) -> Result<T>
    where
        T: seqid::SequencedReply,
        F: FnOnce(&mut OpenOwner) -> Result<T>,
    {
        let owner_id = self.owner_of(stateid)?;
        let slot = self.owners.get(&owner_id).ok_or(NfsError::BadStateid)?;
        let mut owner = slot.lock();
        if owner.released {
            return Err(NfsError::BadStateid);
        }

        seqid::run(&mut owner, seqid, request, exec)
    }

    pub fn open_confirm(
        &self,
        ctx: &Context,
        args: &OpenConfirm4Args,
    ) -> Result<OpenConfirm4ResOk> {
        debug!(current_fh = ?ctx.current_fh, stateid = ?args.open_stateid, seqid = args.seqid, "OPEN_CONFIRM");

        let request = fingerprint(ctx, ArgOp4::OpenConfirm(args.clone()));
        self.sequenced(&args.open_stateid, args.seqid, request, |owner| {
            let state = self.current_open(ctx, &args.open_stateid)?;
            if owner.confirmed {
                return Err(NfsError::BadStateid);
            }

            let open_stateid = self.table.bump(state.file, &args.open_stateid)?;
            owner.confirmed = true;
            info!(owner = ?owner.id, "open owner confirmed");

            Ok(OpenConfirm4ResOk { open_stateid })
        })
    }

    pub fn open_downgrade(
        &self,
        ctx: &Context,
        args: &OpenDowngrade4Args,
    ) -> Result<OpenDowngrade4ResOk> {
        debug!(
            current_fh = ?ctx.current_fh,
            stateid = ?args.open_stateid,
            seqid = args.seqid,
            access = args.share_access,
            deny = args.share_deny,
            "OPEN_DOWNGRADE"
        );

        let request = fingerprint(ctx, ArgOp4::OpenDowngrade(args.clone()));
        self.sequenced(&args.open_stateid, args.seqid, request, |_| {
            let state = self.current_open(ctx, &args.open_stateid)?;
            let share = share_from_wire(args.share_access, args.share_deny)?;
            let open_stateid = self.table.downgrade(state.file, &args.open_stateid, share)?;

            Ok(OpenDowngrade4ResOk { open_stateid })
        })
    }

    /// CLOSE: releases the open's reservation. The returned stateid is
    /// the closed one with its seqid moved forward; it names nothing.
    pub fn close(&self, ctx: &Context, args: &Close4Args) -> Result<Close4ResOk> {
        debug!(current_fh = ?ctx.current_fh, stateid = ?args.open_stateid, seqid = args.seqid, "CLOSE");

        let request = fingerprint(ctx, ArgOp4::Close(args.clone()));
        self.sequenced(&args.open_stateid, args.seqid, request, |owner| {
            let state = self.current_open(ctx, &args.open_stateid)?;
            let record = self.table.remove(state.file, &args.open_stateid)?;

            let other = record.stateid.other;
            self.issuer.retire(&other);
            if let Some(previous) = owner.retired.replace(other) {
                self.issuer.forget(&previous);
            }

            Ok(Close4ResOk {
                open_stateid: StateId4 {
                    seqid: record.stateid.seqid.wrapping_add(1),
                    other,
                },
            })
        })
    }

    /// Resolves a stateid to its current open record
    pub fn validate_stateid(&self, stateid: &StateId4) -> Result<OpenRecord> {
        let state = self.issuer.validate(stateid)?;
        self.table.get(state.file, stateid)
    }

    /// Gate for READ/WRITE on `file` under `stateid`
    pub fn check_io(&self, file: FileId, stateid: &StateId4, io: IoKind) -> Result<()> {
        if !stateid.is_special() {
            let state = self.issuer.validate(stateid)?;
            if state.file != file {
                return Err(NfsError::BadStateid);
            }
        }

        let result = self.table.check_io(file, stateid, io);
        if let Err(e) = &result {
            debug!(?file, ?stateid, ?io, error = %e, "I/O refused");
        }

        result
    }

    /// Aggregate share reservation currently held on `file`
    pub fn file_share(&self, file: FileId) -> ShareReservation {
        self.table.aggregate(file)
    }

    pub fn open_records(&self, file: FileId) -> Vec<OpenRecord> {
        self.table.records(file)
    }

    /// Seqid the owner's next new request must carry, if the owner is known
    pub fn owner_next_seqid(&self, owner: &OpenOwner4) -> Option<SequenceId4> {
        self.owners.get(owner).map(|slot| slot.lock().next_seqid)
    }

    /// Drops an owner with every open it holds, as lease expiry of its
    /// client would. Returns the revoked opens.
    pub fn release_owner(&self, owner: &OpenOwner4) -> Vec<OpenRecord> {
        let slot = match self.owners.remove(owner) {
            Some(slot) => slot,
            None => return Vec::new(),
        };
        let mut state = slot.lock();
        state.released = true;

        let revoked = self.table.revoke_owner(owner);
        for record in &revoked {
            self.issuer.forget(&record.stateid.other);
        }
        if let Some(retired) = state.retired {
            self.issuer.forget(&retired);
        }
        info!(?owner, revoked = revoked.len(), "open owner released");

        revoked
    }
}
