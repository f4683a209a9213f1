
/// Byte order used when interpreting physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian { Little, Big }

/// Helper functions implemented on numeric primitives.
///
/// These let us easily convert between numeric primitives and byte slices
/// in either byte order.
pub trait AccessWidth: Copy + Sized {
    /// Width of the primitive in bytes.
    const WIDTH: usize;
    fn from_bytes(data: &[u8], endian: Endian) -> Self;
    fn to_bytes(self, dst: &mut [u8], endian: Endian);
}

/// Macro to make implementing AccessWidth a bit less verbose.
macro_rules! impl_accesswidth {
    ($type:ident) => {
        impl AccessWidth for $type {
            const WIDTH: usize = std::mem::size_of::<$type>();
            fn from_bytes(data: &[u8], endian: Endian) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$type>()];
                buf.copy_from_slice(&data[..Self::WIDTH]);
                match endian {
                    Endian::Little => Self::from_le_bytes(buf),
                    Endian::Big => Self::from_be_bytes(buf),
                }
            }
            fn to_bytes(self, dst: &mut [u8], endian: Endian) {
                let buf = match endian {
                    Endian::Little => self.to_le_bytes(),
                    Endian::Big => self.to_be_bytes(),
                };
                dst[..Self::WIDTH].copy_from_slice(&buf);
            }
        }
    };
}

// Implement AccessWidth for the supported numeric primitives.
impl_accesswidth!(u64);
impl_accesswidth!(u32);
impl_accesswidth!(u16);
impl_accesswidth!(u8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_order() {
        let data = [0x11, 0x22, 0x33, 0x44];
        assert_eq!(u32::from_bytes(&data, Endian::Little), 0x4433_2211);
        assert_eq!(u32::from_bytes(&data, Endian::Big), 0x1122_3344);

        let mut out = [0u8; 2];
        0xaabbu16.to_bytes(&mut out, Endian::Big);
        assert_eq!(out, [0xaa, 0xbb]);
    }
}
