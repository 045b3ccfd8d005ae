/// XDR (RFC 4506) packing for requests and replies.
///
/// The engine never parses the wire; packing gives every request a
/// canonical byte image, which is what replay detection compares.
use bytes::{BufMut, Bytes, BytesMut};

const PAD_ZERO: [u8; 4] = [0; 4];

/// A trait for packing data in XDR format into a buffer.
pub trait Packer {
    fn pack_uint(&mut self, value: u32);

    fn pack_uhyper(&mut self, value: u64);

    fn pack_bool(&mut self, value: bool);

    fn pack_opaque(&mut self, value: &[u8]);

    fn pack_opaque_fixed(&mut self, value: &[u8]);

    fn pack_string(&mut self, value: &str);
}

impl<Buffer: BufMut> Packer for Buffer {
    #[inline]
    fn pack_uint(&mut self, value: u32) {
        self.put_u32(value)
    }

    #[inline]
    fn pack_uhyper(&mut self, value: u64) {
        self.put_u64(value)
    }

    #[inline]
    fn pack_bool(&mut self, value: bool) {
        self.put_u32(value as u32)
    }

    #[inline]
    fn pack_opaque(&mut self, value: &[u8]) {
        self.put_u32(value.len() as u32);
        self.pack_opaque_fixed(value);
    }

    #[inline]
    fn pack_opaque_fixed(&mut self, value: &[u8]) {
        let len = value.len();
        self.put_slice(value);
        self.put_slice(&PAD_ZERO[..(4 - len % 4) % 4])
    }

    #[inline]
    fn pack_string(&mut self, value: &str) {
        self.pack_opaque(value.as_bytes())
    }
}

/// Trait that allows packing objects into a buffer.
pub trait PackTo<B> {
    /// Pack `self` into `buf`
    fn pack_to(&self, buf: &mut B);
}

/// Packs `value` into a fresh buffer and returns the frozen image
pub fn to_bytes<T: PackTo<BytesMut>>(value: &T) -> Bytes {
    let mut buf = BytesMut::new();
    value.pack_to(&mut buf);
    buf.freeze()
}

macro_rules! impl_pack_to (
    ($type:ty, $method:ident) => {
        impl<B: Packer> PackTo<B> for $type {
            fn pack_to(&self, buf: &mut B) {
                buf.$method(*self)
            }
        }
    }
);

impl_pack_to!(u32, pack_uint);
impl_pack_to!(u64, pack_uhyper);
impl_pack_to!(bool, pack_bool);

impl<B: Packer> PackTo<B> for String {
    fn pack_to(&self, buf: &mut B) {
        buf.pack_string(self);
    }
}

impl<B: Packer> PackTo<B> for Bytes {
    fn pack_to(&self, buf: &mut B) {
        buf.pack_opaque(self.as_ref());
    }
}

impl<T: PackTo<B>, B: Packer> PackTo<B> for Option<T> {
    fn pack_to(&self, buf: &mut B) {
        match self {
            Some(t) => {
                buf.pack_bool(true);
                t.pack_to(buf);
            }
            None => {
                buf.pack_bool(false);
            }
        }
    }
}

impl<T: PackTo<B>, B: Packer> PackTo<B> for Vec<T> {
    fn pack_to(&self, buf: &mut B) {
        buf.pack_uint(self.len() as u32);
        for item in self.iter() {
            item.pack_to(buf);
        }
    }
}

// Fixed-size opaques (verifiers, stateid "other" fields)
impl<B: Packer, const N: usize> PackTo<B> for [u8; N] {
    fn pack_to(&self, buf: &mut B) {
        buf.pack_opaque_fixed(self);
    }
}
