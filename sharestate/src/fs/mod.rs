//! Filesystem collaborator consumed by the open-state engine.
//!
//! The engine never touches file data; it resolves names, creates
//! objects, and reads or writes the handful of attributes OPEN cares
//! about through the [`Filesystem`] trait.
use crate::{
    nfs4::{
        attr::{Bitmap4, FileAttributes},
        ops::{ShareAccess, Verifier4},
    },
    result::{NfsError, Result},
};
use sharestate_macros::PackTo;

pub mod mem;

pub use mem::MemFs;

/// Opaque identity of a filesystem object, the engine's filehandle
#[derive(PackTo, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u64);

/// Closed set of object kinds a filehandle can refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Socket,
    Fifo,
}

/// Caller identity used for permission evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    pub const ROOT: Credentials = Credentials { uid: 0, gid: 0 };

    pub fn new(uid: u32, gid: u32) -> Self {
        Credentials { uid, gid }
    }
}

pub trait Filesystem: Send + Sync {
    /// Root directory
    fn root(&self) -> FileId;

    /// Kind of the object behind `file`
    fn kind(&self, file: FileId) -> Result<FileKind>;

    /// Finds `name` in directory `dir`.
    ///
    /// Fails with `NotDir` when `dir` is not a directory and `NoEnt`
    /// when the name is absent.
    fn lookup(&self, dir: FileId, name: &str) -> Result<FileId>;

    /// Atomically creates a regular file named `name` in `dir`, failing
    /// with `AlreadyExists` when the name is taken. A verifier, when
    /// given, is stored as creation metadata.
    fn create(
        &self,
        dir: FileId,
        name: &str,
        attrs: &FileAttributes,
        verifier: Option<Verifier4>,
        cred: &Credentials,
    ) -> Result<FileId>;

    fn get_attrs(&self, file: FileId) -> Result<FileAttributes>;

    /// Applies `attrs`; read-only attributes give `Invalid` and
    /// unsupported ones `AttrNotSupp`.
    fn set_attrs(&self, file: FileId, attrs: &FileAttributes) -> Result<()>;

    /// Attributes this filesystem implements
    fn supported_attrs(&self) -> Bitmap4;

    /// Verifier recorded by an exclusive create, if any
    fn verifier(&self, file: FileId) -> Result<Option<Verifier4>>;

    /// Permission-bit evaluation for opening `file` with `access`
    fn check_access(&self, file: FileId, cred: &Credentials, access: ShareAccess) -> Result<()>;

    /// Change attribute of a directory, used for OPEN's change_info
    fn change(&self, dir: FileId) -> Result<u64>;

    /// Walks `path` from the root
    fn resolve(&self, path: &[&str]) -> Result<FileId> {
        let mut current = self.root();
        for component in path {
            match self.kind(current)? {
                FileKind::Directory => {}
                FileKind::Symlink => return Err(NfsError::SymlinkNotSupported),
                _ => return Err(NfsError::NotDir),
            }
            current = self.lookup(current, component)?;
        }

        Ok(current)
    }
}
