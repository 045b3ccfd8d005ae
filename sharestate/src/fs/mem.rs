//! In-memory filesystem used by the binary and the tests.
use super::{Credentials, FileId, FileKind, Filesystem};
use crate::{
    nfs4::{
        attr::{self, Bitmap4, FileAttributes, NfsType4},
        ops::{ShareAccess, Verifier4},
    },
    result::{NfsError, Result},
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

const ROOT_ID: FileId = FileId(1);

#[derive(Debug)]
struct Node {
    kind: FileKind,
    size: u64,
    mode: u32,
    uid: u32,
    owner: String,
    owner_group: String,
    change: u64,
    verifier: Option<Verifier4>,
    children: BTreeMap<String, FileId>,
}

impl Node {
    fn new(kind: FileKind, mode: u32, uid: u32) -> Node {
        Node {
            kind,
            size: 0,
            mode,
            uid,
            owner: uid.to_string(),
            owner_group: uid.to_string(),
            change: 1,
            verifier: None,
            children: BTreeMap::new(),
        }
    }
}

struct MemFsInner {
    nodes: HashMap<FileId, Node>,
    next_id: u64,
}

impl MemFsInner {
    fn node(&self, file: FileId) -> Result<&Node> {
        self.nodes.get(&file).ok_or(NfsError::NoEnt)
    }

    fn node_mut(&mut self, file: FileId) -> Result<&mut Node> {
        self.nodes.get_mut(&file).ok_or(NfsError::NoEnt)
    }

    fn insert(&mut self, dir: FileId, name: &str, node: Node) -> Result<FileId> {
        let parent = self.node(dir)?;
        if parent.kind != FileKind::Directory {
            return Err(NfsError::NotDir);
        }
        if parent.children.contains_key(name) {
            return Err(NfsError::AlreadyExists);
        }

        let id = FileId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, node);

        let parent = self.node_mut(dir)?;
        parent.children.insert(name.to_owned(), id);
        parent.change += 1;

        Ok(id)
    }
}

/// A flat, lock-protected tree of nodes
pub struct MemFs {
    inner: RwLock<MemFsInner>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    /// Creates a filesystem holding an empty, world-writable root
    pub fn new() -> MemFs {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID, Node::new(FileKind::Directory, 0o777, 0));
        MemFs {
            inner: RwLock::new(MemFsInner { nodes, next_id: 2 }),
        }
    }

    /// Adds a non-regular object (directory, symlink, device, ...)
    pub fn make_node(&self, dir: FileId, name: &str, kind: FileKind) -> Result<FileId> {
        self.inner
            .write()
            .insert(dir, name, Node::new(kind, 0o755, 0))
    }

    pub fn mkdir(&self, dir: FileId, name: &str) -> Result<FileId> {
        let id = self.make_node(dir, name, FileKind::Directory)?;
        self.inner.write().node_mut(id)?.mode = 0o777;
        Ok(id)
    }

    /// Changes ownership and permission bits, as SETATTR would
    pub fn chmod(&self, file: FileId, uid: u32, mode: u32) -> Result<()> {
        let mut inner = self.inner.write();
        let node = inner.node_mut(file)?;
        node.uid = uid;
        node.mode = mode;
        node.change += 1;
        Ok(())
    }
}

impl Filesystem for MemFs {
    fn root(&self) -> FileId {
        ROOT_ID
    }

    fn kind(&self, file: FileId) -> Result<FileKind> {
        Ok(self.inner.read().node(file)?.kind)
    }

    fn lookup(&self, dir: FileId, name: &str) -> Result<FileId> {
        let inner = self.inner.read();
        let parent = inner.node(dir)?;
        if parent.kind != FileKind::Directory {
            return Err(NfsError::NotDir);
        }

        parent.children.get(name).copied().ok_or(NfsError::NoEnt)
    }

    fn create(
        &self,
        dir: FileId,
        name: &str,
        attrs: &FileAttributes,
        verifier: Option<Verifier4>,
        cred: &Credentials,
    ) -> Result<FileId> {
        let mut node = Node::new(FileKind::Regular, attrs.mode.unwrap_or(0o644), cred.uid);
        node.size = attrs.size.unwrap_or(0);
        if let Some(owner) = &attrs.owner {
            node.owner = owner.clone();
        }
        if let Some(group) = &attrs.owner_group {
            node.owner_group = group.clone();
        }
        node.verifier = verifier;

        self.inner.write().insert(dir, name, node)
    }

    fn get_attrs(&self, file: FileId) -> Result<FileAttributes> {
        let inner = self.inner.read();
        let node = inner.node(file)?;
        let obj_type = match node.kind {
            FileKind::Regular => NfsType4::Reg,
            FileKind::Directory => NfsType4::Dir,
            FileKind::Symlink => NfsType4::Lnk,
            FileKind::BlockDevice => NfsType4::Blk,
            FileKind::CharDevice => NfsType4::Chr,
            FileKind::Socket => NfsType4::Sock,
            FileKind::Fifo => NfsType4::Fifo,
        };

        Ok(FileAttributes {
            obj_type: Some(obj_type),
            change: Some(node.change),
            size: Some(node.size),
            link_support: Some(false),
            mode: Some(node.mode),
            owner: Some(node.owner.clone()),
            owner_group: Some(node.owner_group.clone()),
            ..Default::default()
        })
    }

    fn set_attrs(&self, file: FileId, attrs: &FileAttributes) -> Result<()> {
        let supported = self.supported_attrs();
        for bit in attrs.calculate_bitmap().bits() {
            if attr::READ_ONLY.contains(&bit) {
                return Err(NfsError::Invalid);
            }
            if !supported.is_set(bit) {
                return Err(NfsError::AttrNotSupp);
            }
        }

        let mut inner = self.inner.write();
        let node = inner.node_mut(file)?;
        if let Some(size) = attrs.size {
            node.size = size;
        }
        if let Some(mode) = attrs.mode {
            node.mode = mode;
        }
        if let Some(owner) = &attrs.owner {
            node.owner = owner.clone();
        }
        if let Some(group) = &attrs.owner_group {
            node.owner_group = group.clone();
        }
        node.change += 1;

        Ok(())
    }

    fn supported_attrs(&self) -> Bitmap4 {
        Bitmap4::from_bits(&[
            attr::SUPPORTED_ATTRS,
            attr::TYPE,
            attr::CHANGE,
            attr::SIZE,
            attr::LINK_SUPPORT,
            attr::MODE,
            attr::OWNER,
            attr::OWNER_GROUP,
        ])
    }

    fn verifier(&self, file: FileId) -> Result<Option<Verifier4>> {
        Ok(self.inner.read().node(file)?.verifier)
    }

    fn check_access(&self, file: FileId, cred: &Credentials, access: ShareAccess) -> Result<()> {
        let inner = self.inner.read();
        let node = inner.node(file)?;
        if cred.uid == 0 {
            return Ok(());
        }

        let bits = if cred.uid == node.uid {
            (node.mode >> 6) & 0o7
        } else {
            node.mode & 0o7
        };

        let mut needed = 0;
        if access.contains(ShareAccess::READ) {
            needed |= 0o4;
        }
        if access.contains(ShareAccess::WRITE) {
            needed |= 0o2;
        }

        if bits & needed == needed {
            Ok(())
        } else {
            Err(NfsError::AccessDenied)
        }
    }

    fn change(&self, dir: FileId) -> Result<u64> {
        Ok(self.inner.read().node(dir)?.change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_lookup() {
        let fs = MemFs::new();
        let root = fs.root();
        let dir = fs.mkdir(root, "home").unwrap();
        let file = fs
            .create(dir, "a", &FileAttributes::new().with_size(32), None, &Credentials::ROOT)
            .unwrap();

        assert_eq!(fs.lookup(dir, "a"), Ok(file));
        assert_eq!(fs.resolve(&["home", "a"]), Ok(file));
        assert_eq!(fs.get_attrs(file).unwrap().size, Some(32));
        assert_eq!(fs.lookup(dir, "b"), Err(NfsError::NoEnt));
        assert_eq!(fs.lookup(file, "b"), Err(NfsError::NotDir));
        assert_eq!(fs.resolve(&["home", "a", "b"]), Err(NfsError::NotDir));
        assert_eq!(
            fs.create(dir, "a", &FileAttributes::new(), None, &Credentials::ROOT),
            Err(NfsError::AlreadyExists)
        );
    }

    #[test]
    fn create_bumps_directory_change() {
        let fs = MemFs::new();
        let before = fs.change(fs.root()).unwrap();
        fs.create(fs.root(), "a", &FileAttributes::new(), None, &Credentials::ROOT)
            .unwrap();
        assert!(fs.change(fs.root()).unwrap() > before);
    }

    #[test]
    fn set_attrs_validation() {
        let fs = MemFs::new();
        let file = fs
            .create(fs.root(), "a", &FileAttributes::new(), None, &Credentials::ROOT)
            .unwrap();

        let read_only = FileAttributes {
            link_support: Some(true),
            ..Default::default()
        };
        assert_eq!(fs.set_attrs(file, &read_only), Err(NfsError::Invalid));

        let unsupported = FileAttributes {
            hidden: Some(true),
            ..Default::default()
        };
        assert_eq!(fs.set_attrs(file, &unsupported), Err(NfsError::AttrNotSupp));

        fs.set_attrs(file, &FileAttributes::new().with_size(7)).unwrap();
        assert_eq!(fs.get_attrs(file).unwrap().size, Some(7));
    }

    #[test]
    fn permission_bits() {
        let fs = MemFs::new();
        let file = fs
            .create(fs.root(), "a", &FileAttributes::new(), None, &Credentials::ROOT)
            .unwrap();
        fs.chmod(file, 100, 0o700).unwrap();

        let owner = Credentials::new(100, 100);
        let other = Credentials::new(200, 200);
        assert_eq!(fs.check_access(file, &owner, ShareAccess::BOTH), Ok(()));
        assert_eq!(
            fs.check_access(file, &other, ShareAccess::READ),
            Err(NfsError::AccessDenied)
        );
        assert_eq!(fs.check_access(file, &Credentials::ROOT, ShareAccess::BOTH), Ok(()));

        fs.chmod(file, 100, 0o704).unwrap();
        assert_eq!(fs.check_access(file, &other, ShareAccess::READ), Ok(()));
        assert_eq!(
            fs.check_access(file, &other, ShareAccess::WRITE),
            Err(NfsError::AccessDenied)
        );
    }
}
