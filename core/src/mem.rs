//! Flat physical memory shared by the cores of an emulated system.

pub mod prim;

use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{bail, Context};
use log::debug;

use crate::mem::prim::*;

/// A flat block of physical memory starting at physical address zero.
///
/// Table walks and DMA transfers read and write through this; anything
/// outside of it is unbacked.
pub struct PhysMemory {
    /// Vector of bytes with the contents of this memory.
    pub data: Vec<u8>,
    /// Hash of the initial contents.
    hash: u32,
}
impl PhysMemory {
    pub fn new(len: usize) -> Self {
        PhysMemory { data: vec![0u8; len], hash: 0 }
    }

    /// Create a memory of `len` bytes, initialized from an image file.
    pub fn from_image(len: usize, filename: impl AsRef<Path>) -> anyhow::Result<Self> {
        let filename = filename.as_ref();
        let mut f = File::open(filename)
            .context(format!("PhysMemory: couldn't open image {}", filename.display()))?;
        let size = f.metadata()?.len();
        if size > len as u64 {
            bail!("PhysMemory: image {} ({size:#x} bytes) larger than memory ({len:#x} bytes)",
                filename.display());
        }
        let mut data = vec![0u8; len];
        f.read_exact(&mut data[..size as usize])
            .context(format!("PhysMemory: short read of image {}", filename.display()))?;
        let hash = crc32fast::hash(&data);
        debug!(target: "MEM", "Loaded {} ({size:#x} of {len:#x} bytes), crc32={hash:08x}",
            filename.display());
        Ok(PhysMemory { data, hash })
    }

    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }
    pub fn hash(&self) -> u32 { self.hash }

    /// Returns true when `[pa, pa + len)` is entirely backed.
    pub fn contains(&self, pa: u64, len: usize) -> bool {
        pa.checked_add(len as u64).is_some_and(|end| end <= self.data.len() as u64)
    }

    pub fn dump(&self, filename: &impl AsRef<Path>) -> anyhow::Result<()> {
        let filename = filename.as_ref();
        let mut f = File::create(filename)
            .context(format!("PhysMemory: couldn't create dump file {}", filename.display()))?;
        f.write_all(self.data.as_slice())?;
        debug!(target: "MEM", "Dumped memory to {}", filename.display());
        Ok(())
    }
}

impl fmt::Debug for PhysMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysMemory").field("len", &self.data.len()).finish()
    }
}

/// Generic reads and writes.
impl PhysMemory {
    pub fn read<T: AccessWidth>(&self, pa: u64, endian: Endian) -> anyhow::Result<T> {
        if !self.contains(pa, T::WIDTH) {
            bail!("Out-of-bounds physical read at {pa:x}");
        }
        let off = pa as usize;
        Ok(T::from_bytes(&self.data[off..off + T::WIDTH], endian))
    }
    pub fn write<T: AccessWidth>(&mut self, pa: u64, val: T, endian: Endian) -> anyhow::Result<()> {
        if !self.contains(pa, T::WIDTH) {
            bail!("Out-of-bounds physical write at {pa:x}");
        }
        let off = pa as usize;
        val.to_bytes(&mut self.data[off..off + T::WIDTH], endian);
        Ok(())
    }
}

/// Bulk reads and writes.
impl PhysMemory {
    pub fn read_buf(&self, pa: u64, dst: &mut [u8]) -> anyhow::Result<()> {
        if !self.contains(pa, dst.len()) {
            bail!("OOB bulk read on PhysMemory, address {pa:x}");
        }
        let off = pa as usize;
        dst.copy_from_slice(&self.data[off..off + dst.len()]);
        Ok(())
    }
    pub fn write_buf(&mut self, pa: u64, src: &[u8]) -> anyhow::Result<()> {
        if !self.contains(pa, src.len()) {
            bail!("OOB bulk write on PhysMemory, address {pa:x}");
        }
        let off = pa as usize;
        self.data[off..off + src.len()].copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        let mut mem = PhysMemory::new(0x100);
        assert!(mem.write(0xfc, 0xdead_beefu32, Endian::Little).is_ok());
        assert!(mem.write(0xfd, 0u32, Endian::Little).is_err());
        assert_eq!(mem.read::<u32>(0xfc, Endian::Big).unwrap(), 0xefbe_adde);
        assert!(!mem.contains(u64::MAX, 1));
    }

    #[test]
    fn image_loading() {
        let path = std::env::temp_dir().join(format!("armvm-image-{}.bin", std::process::id()));
        std::fs::write(&path, [1u8, 2, 3, 4, 5, 6]).unwrap();

        let mem = PhysMemory::from_image(0x10, &path).unwrap();
        assert_eq!(&mem.data[..8], &[1, 2, 3, 4, 5, 6, 0, 0]);
        assert_eq!(mem.hash(), crc32fast::hash(&mem.data));
        assert!(PhysMemory::from_image(4, &path).is_err());

        std::fs::remove_file(&path).unwrap();
    }
}
