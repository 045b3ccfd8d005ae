//! OPEN create-mode resolution
use crate::{
    config::ServerConfig,
    fs::{Credentials, FileId, Filesystem},
    nfs4::{
        attr::{self, Bitmap4, FileAttributes},
        ops::{CreateHow4, OpenFlag4, Verifier4},
    },
    result::{NfsError, Result},
};
use tracing::debug;

/// Object an OPEN resolved to, before any share state is touched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub file: FileId,
    /// The object was created by this request
    pub created: bool,
    /// Size to apply once the open is admitted (UNCHECKED on an
    /// existing file)
    pub truncate: Option<u64>,
    /// Attributes set on the object by this request
    pub attr_set: Bitmap4,
}

impl Resolved {
    fn existing(file: FileId) -> Self {
        Resolved {
            file,
            created: false,
            truncate: None,
            attr_set: Bitmap4::new(),
        }
    }

    fn created(file: FileId, attr_set: Bitmap4) -> Self {
        Resolved {
            file,
            created: true,
            truncate: None,
            attr_set,
        }
    }
}

/// Maps an OPEN's create mode onto filesystem lookups and creates
pub struct CreateModeResolver<'a> {
    fs: &'a dyn Filesystem,
    config: &'a ServerConfig,
}

impl<'a> CreateModeResolver<'a> {
    pub fn new(fs: &'a dyn Filesystem, config: &'a ServerConfig) -> Self {
        CreateModeResolver { fs, config }
    }

    pub fn resolve(
        &self,
        dir: FileId,
        name: &str,
        how: &OpenFlag4,
        cred: &Credentials,
    ) -> Result<Resolved> {
        match how {
            OpenFlag4::NoCreate => Ok(Resolved::existing(self.fs.lookup(dir, name)?)),
            OpenFlag4::Create(CreateHow4::Unchecked(attrs)) => {
                self.check_attrs(attrs)?;
                self.unchecked(dir, name, attrs, cred)
            }
            OpenFlag4::Create(CreateHow4::Guarded(attrs)) => {
                self.check_attrs(attrs)?;
                let file = self.fs.create(dir, name, attrs, None, cred)?;
                Ok(Resolved::created(file, attrs.calculate_bitmap()))
            }
            OpenFlag4::Create(CreateHow4::Exclusive(verifier)) => {
                if !self.config.exclusive_create {
                    return Err(NfsError::NotSupported);
                }
                self.exclusive(dir, name, *verifier, cred)
            }
        }
    }

    /// Rejects attributes a client may not set at creation
    pub fn check_attrs(&self, attrs: &FileAttributes) -> Result<()> {
        let supported = self.fs.supported_attrs();
        for bit in attrs.calculate_bitmap().bits() {
            if attr::READ_ONLY.contains(&bit) {
                debug!(bit, "read-only attribute in create");
                return Err(NfsError::Invalid);
            }
            if !supported.is_set(bit) {
                debug!(bit, "unsupported attribute in create");
                return Err(NfsError::AttrNotSupp);
            }
        }

        Ok(())
    }

    fn unchecked(
        &self,
        dir: FileId,
        name: &str,
        attrs: &FileAttributes,
        cred: &Credentials,
    ) -> Result<Resolved> {
        match self.fs.lookup(dir, name) {
            Ok(file) => Ok(Resolved {
                truncate: attrs.size,
                ..Resolved::existing(file)
            }),
            Err(NfsError::NoEnt) => match self.fs.create(dir, name, attrs, None, cred) {
                Ok(file) => Ok(Resolved::created(file, attrs.calculate_bitmap())),
                // Lost a creation race; open what the winner made
                Err(NfsError::AlreadyExists) => Ok(Resolved {
                    truncate: attrs.size,
                    ..Resolved::existing(self.fs.lookup(dir, name)?)
                }),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    fn exclusive(
        &self,
        dir: FileId,
        name: &str,
        verifier: Verifier4,
        cred: &Credentials,
    ) -> Result<Resolved> {
        let file = match self.fs.lookup(dir, name) {
            Ok(file) => file,
            Err(NfsError::NoEnt) => {
                match self
                    .fs
                    .create(dir, name, &FileAttributes::new(), Some(verifier), cred)
                {
                    Ok(file) => return Ok(Resolved::created(file, Bitmap4::new())),
                    Err(NfsError::AlreadyExists) => self.fs.lookup(dir, name)?,
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        // A retransmitted exclusive create finds its own verifier
        if self.fs.verifier(file)? == Some(verifier) {
            debug!(?file, "exclusive create matched stored verifier");
            Ok(Resolved::existing(file))
        } else {
            Err(NfsError::AlreadyExists)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFs;

    fn setup() -> (MemFs, ServerConfig) {
        (MemFs::new(), ServerConfig::default())
    }

    #[test]
    fn no_create_requires_existing() {
        let (fs, config) = setup();
        let resolver = CreateModeResolver::new(&fs, &config);
        let root = fs.root();

        assert_eq!(
            resolver.resolve(root, "missing", &OpenFlag4::NoCreate, &Credentials::ROOT),
            Err(NfsError::NoEnt)
        );
    }

    #[test]
    fn unchecked_creates_then_opens() {
        let (fs, config) = setup();
        let resolver = CreateModeResolver::new(&fs, &config);
        let root = fs.root();
        let how = OpenFlag4::Create(CreateHow4::Unchecked(FileAttributes::new().with_mode(0o600)));

        let first = resolver
            .resolve(root, "f", &how, &Credentials::ROOT)
            .unwrap();
        assert!(first.created);
        assert!(first.attr_set.is_set(attr::MODE));

        let second = resolver
            .resolve(root, "f", &how, &Credentials::ROOT)
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.file, first.file);
        assert_eq!(second.truncate, None);
    }

    #[test]
    fn unchecked_with_size_truncates_existing() {
        let (fs, config) = setup();
        let resolver = CreateModeResolver::new(&fs, &config);
        let root = fs.root();
        fs.create(
            root,
            "f",
            &FileAttributes::new().with_size(100),
            None,
            &Credentials::ROOT,
        )
        .unwrap();

        let how = OpenFlag4::Create(CreateHow4::Unchecked(FileAttributes::new().with_size(0)));
        let resolved = resolver
            .resolve(root, "f", &how, &Credentials::ROOT)
            .unwrap();
        assert_eq!(resolved.truncate, Some(0));
    }

    #[test]
    fn guarded_fails_on_existing() {
        let (fs, config) = setup();
        let resolver = CreateModeResolver::new(&fs, &config);
        let root = fs.root();
        let how = OpenFlag4::Create(CreateHow4::Guarded(FileAttributes::new()));

        assert!(resolver.resolve(root, "f", &how, &Credentials::ROOT).unwrap().created);
        assert_eq!(
            resolver.resolve(root, "f", &how, &Credentials::ROOT),
            Err(NfsError::AlreadyExists)
        );
    }

    #[test]
    fn exclusive_matches_verifier() {
        let (fs, config) = setup();
        let resolver = CreateModeResolver::new(&fs, &config);
        let root = fs.root();
        let mine = OpenFlag4::Create(CreateHow4::Exclusive(Verifier4([1; 8])));
        let theirs = OpenFlag4::Create(CreateHow4::Exclusive(Verifier4([2; 8])));

        let created = resolver
            .resolve(root, "f", &mine, &Credentials::ROOT)
            .unwrap();
        assert!(created.created);
        assert!(created.attr_set.is_empty());

        let again = resolver
            .resolve(root, "f", &mine, &Credentials::ROOT)
            .unwrap();
        assert_eq!(again.file, created.file);
        assert!(!again.created);

        assert_eq!(
            resolver.resolve(root, "f", &theirs, &Credentials::ROOT),
            Err(NfsError::AlreadyExists)
        );
    }

    #[test]
    fn exclusive_can_be_disabled() {
        let fs = MemFs::new();
        let config = ServerConfig {
            exclusive_create: false,
            ..Default::default()
        };
        let resolver = CreateModeResolver::new(&fs, &config);
        let how = OpenFlag4::Create(CreateHow4::Exclusive(Verifier4([1; 8])));

        assert_eq!(
            resolver.resolve(fs.root(), "f", &how, &Credentials::ROOT),
            Err(NfsError::NotSupported)
        );
    }

    #[test]
    fn bad_attributes_are_rejected_before_create() {
        let (fs, config) = setup();
        let resolver = CreateModeResolver::new(&fs, &config);
        let root = fs.root();

        let read_only = FileAttributes {
            change: Some(5),
            ..Default::default()
        };
        assert_eq!(
            resolver.resolve(
                root,
                "f",
                &OpenFlag4::Create(CreateHow4::Guarded(read_only)),
                &Credentials::ROOT
            ),
            Err(NfsError::Invalid)
        );

        let unsupported = FileAttributes {
            hidden: Some(true),
            ..Default::default()
        };
        assert_eq!(
            resolver.resolve(
                root,
                "f",
                &OpenFlag4::Create(CreateHow4::Unchecked(unsupported)),
                &Credentials::ROOT
            ),
            Err(NfsError::AttrNotSupp)
        );

        assert_eq!(fs.lookup(root, "f"), Err(NfsError::NoEnt));
    }
}
