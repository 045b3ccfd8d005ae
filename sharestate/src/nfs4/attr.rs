use crate::xdr::{PackTo, Packer};
use bytes::BytesMut;
use sharestate_macros::PackTo;

pub const SUPPORTED_ATTRS: u32 = 0;
pub const TYPE: u32 = 1;
pub const CHANGE: u32 = 3;
pub const SIZE: u32 = 4;
pub const LINK_SUPPORT: u32 = 5;
pub const ARCHIVE: u32 = 14;
pub const HIDDEN: u32 = 25;
pub const MODE: u32 = 33;
pub const OWNER: u32 = 36;
pub const OWNER_GROUP: u32 = 37;

/// Attributes a client may never set
pub const READ_ONLY: [u32; 4] = [SUPPORTED_ATTRS, TYPE, CHANGE, LINK_SUPPORT];

/// A bitmap that serializes as the NFS4 bitmap4 type
#[derive(PackTo, Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap4 {
    array: Vec<u32>,
}

impl Bitmap4 {
    /// Returns an empty bitmap
    pub fn new() -> Self {
        Bitmap4 { array: Vec::new() }
    }

    /// Builds a bitmap with the given bits set
    pub fn from_bits(bits: &[u32]) -> Self {
        let mut bm = Bitmap4::new();
        for &n in bits {
            bm.set(n);
        }
        bm
    }

    /// Checks if the `n`th bit is set
    pub fn is_set(&self, n: u32) -> bool {
        let word = (n / 32) as usize;
        let bit = n % 32;
        match self.array.get(word) {
            Some(w) => (w & (1 << bit)) != 0,
            None => false,
        }
    }

    /// Sets the `n`th bit
    pub fn set(&mut self, n: u32) {
        let word = (n / 32) as usize;
        let bit = n % 32;
        if word >= self.array.len() {
            self.array.resize(word + 1, 0);
        }

        self.array[word] |= 1 << bit;
    }

    /// Clears the `n`th bit, trailing empty words are dropped
    pub fn clear(&mut self, n: u32) {
        let word = (n / 32) as usize;
        let bit = n % 32;
        if word >= self.array.len() {
            return;
        }

        self.array[word] &= !(1 << bit);
        while self.array.last() == Some(&0) {
            self.array.pop();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.array.iter().all(|w| *w == 0)
    }

    /// Iterates over the set bit numbers in ascending order
    pub fn bits(&self) -> impl Iterator<Item = u32> + '_ {
        self.array.iter().enumerate().flat_map(|(i, w)| {
            (0..32u32)
                .filter(move |b| w & (1 << b) != 0)
                .map(move |b| i as u32 * 32 + b)
        })
    }
}

/// File types (RFC 7531)
#[derive(PackTo, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfsType4 {
    Reg = 1,
    Dir = 2,
    Blk = 3,
    Chr = 4,
    Lnk = 5,
    Sock = 6,
    Fifo = 7,
    AttrDir = 8,
    NamedAttr = 9,
}

/// The subset of fattr4 that OPEN carries in createattrs.
///
/// Read-only members exist so that a client sending them can be
/// rejected, the engine never applies them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    pub obj_type: Option<NfsType4>,
    pub change: Option<u64>,
    pub size: Option<u64>,
    pub link_support: Option<bool>,
    pub archive: Option<bool>,
    pub hidden: Option<bool>,
    pub mode: Option<u32>,
    pub owner: Option<String>,
    pub owner_group: Option<String>,
}

// applies macro to all fields in attribute number order
macro_rules! all_fields {
    ($macro:ident) => {
        $macro!(obj_type, TYPE); // 1
        $macro!(change, CHANGE); // 3
        $macro!(size, SIZE); // 4
        $macro!(link_support, LINK_SUPPORT); // 5
        $macro!(archive, ARCHIVE); // 14
        $macro!(hidden, HIDDEN); // 25
        $macro!(mode, MODE); // 33
        $macro!(owner, OWNER); // 36
        $macro!(owner_group, OWNER_GROUP); // 37
    };
}

impl FileAttributes {
    /// returns a new, empty FileAttributes
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// builds a Bitmap4 corresponding to the attributes with values
    pub fn calculate_bitmap(&self) -> Bitmap4 {
        let mut bm = Bitmap4::new();

        macro_rules! set_bit {
            ($member:ident, $bit:expr) => {
                if self.$member.is_some() {
                    bm.set($bit);
                };
            };
        }

        all_fields!(set_bit);

        bm
    }
}

impl<B: Packer> PackTo<B> for FileAttributes {
    fn pack_to(&self, buf: &mut B) {
        let bm = self.calculate_bitmap();
        bm.pack_to(buf);

        let mut opaque = BytesMut::new();

        macro_rules! pack {
            ($member:ident, $bit:expr) => {
                if let Some(packme) = &self.$member {
                    packme.pack_to(&mut opaque)
                };
            };
        }

        all_fields!(pack);

        opaque.freeze().pack_to(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_set_clear() {
        let mut bm = Bitmap4::new();
        bm.set(MODE);
        bm.set(SIZE);
        assert!(bm.is_set(MODE));
        assert!(bm.is_set(SIZE));
        assert!(!bm.is_set(OWNER));
        assert_eq!(bm.bits().collect::<Vec<_>>(), vec![SIZE, MODE]);

        bm.clear(MODE);
        assert_eq!(bm, Bitmap4::from_bits(&[SIZE]));
        bm.clear(SIZE);
        assert!(bm.is_empty());
    }

    #[test]
    fn attribute_bitmap_follows_values() {
        let attrs = FileAttributes::new().with_mode(0o644).with_size(32);
        assert_eq!(attrs.calculate_bitmap(), Bitmap4::from_bits(&[SIZE, MODE]));
    }
}
