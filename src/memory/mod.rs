//! Memory Arena Bridge
//!
//! Host-visible buffers live inside a managed heap. Every buffer handed to
//! the native library is copied in through [`Memory::copy_into`] and every
//! result comes back out through [`Memory::read`]. The arena keeps a ledger
//! of live allocations so that leaks and double frees show up in
//! [`AllocationStats`] instead of silently corrupting the heap.

mod linear;

pub use linear::{Allocator, LinearMemory, PAGE_SIZE};

use std::collections::HashMap;

use crate::error::{BridgeError, Result};

/// An address inside the arena heap. `0` is null.
pub type Address = u32;

/// A region of arena memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedBuffer {
    pub address: Address,
    pub size: u32,
}

impl ManagedBuffer {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Host data that can be copied into the arena.
#[derive(Debug, Clone, Copy)]
pub enum BufferSource<'a> {
    /// Raw bytes, copied exactly.
    Bytes(&'a [u8]),
    /// Text, copied as UTF-8 without a terminator.
    Text(&'a str),
}

impl<'a> BufferSource<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        match *self {
            Self::Bytes(bytes) => bytes,
            Self::Text(text) => text.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> From<&'a str> for BufferSource<'a> {
    fn from(text: &'a str) -> Self {
        Self::Text(text)
    }
}

impl<'a> From<&'a String> for BufferSource<'a> {
    fn from(text: &'a String) -> Self {
        Self::Text(text)
    }
}

impl<'a> From<&'a [u8]> for BufferSource<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for BufferSource<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for BufferSource<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Self::Bytes(bytes)
    }
}

/// Allocation counters kept by [`Memory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    pub allocations: u64,
    pub releases: u64,
    /// Releases of addresses the arena never handed out (or already freed).
    pub invalid_releases: u64,
    pub live: usize,
    pub live_bytes: u64,
    pub peak_live_bytes: u64,
}

impl AllocationStats {
    /// Every allocation was matched by exactly one release.
    pub fn is_balanced(&self) -> bool {
        self.allocations == self.releases && self.live == 0 && self.invalid_releases == 0
    }
}

/// The managed arena: an [`Allocator`] plus a ledger of live blocks.
pub struct Memory {
    allocator: Box<dyn Allocator>,
    live: HashMap<Address, u32>,
    stats: AllocationStats,
}

impl Memory {
    pub fn new(allocator: Box<dyn Allocator>) -> Self {
        Self {
            allocator,
            live: HashMap::new(),
            stats: AllocationStats::default(),
        }
    }

    /// Allocate `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::OutOfMemory` if the allocator returns null.
    pub fn allocate(&mut self, size: u32) -> Result<Address> {
        let address = self.allocator.malloc(size);
        if address == 0 {
            log::debug!("allocation of {size} bytes failed");
            return Err(BridgeError::OutOfMemory { requested: size });
        }
        self.live.insert(address, size);
        self.stats.allocations += 1;
        self.stats.live = self.live.len();
        self.stats.live_bytes += u64::from(size);
        self.stats.peak_live_bytes = self.stats.peak_live_bytes.max(self.stats.live_bytes);
        log::trace!("allocated {size} bytes at {address:#x}");
        Ok(address)
    }

    /// Release a live allocation. Unknown addresses are never forwarded to
    /// the allocator.
    pub fn release(&mut self, address: Address) {
        match self.live.remove(&address) {
            Some(size) => {
                self.allocator.free(address);
                self.stats.releases += 1;
                self.stats.live = self.live.len();
                self.stats.live_bytes -= u64::from(size);
                log::trace!("released {size} bytes at {address:#x}");
            }
            None => {
                self.stats.invalid_releases += 1;
                log::warn!("release of unknown address {address:#x}");
            }
        }
    }

    /// Copy host data into a fresh buffer.
    pub fn copy_into<'a>(&mut self, source: impl Into<BufferSource<'a>>) -> Result<ManagedBuffer> {
        let bytes = source.into().as_bytes();
        let size = u32::try_from(bytes.len())
            .map_err(|_| BridgeError::OutOfMemory { requested: u32::MAX })?;
        let address = self.allocate_filled(size, |memory, address| memory.write(address, bytes))?;
        Ok(ManagedBuffer { address, size })
    }

    /// Copy a string followed by a nul terminator. The returned size
    /// includes the terminator.
    pub fn copy_cstr(&mut self, text: &str) -> Result<ManagedBuffer> {
        let size = u32::try_from(text.len() + 1)
            .map_err(|_| BridgeError::OutOfMemory { requested: u32::MAX })?;
        let address = self.allocate_filled(size, |memory, address| {
            memory.write(address, text.as_bytes())?;
            memory.write(address + size - 1, &[0])
        })?;
        Ok(ManagedBuffer { address, size })
    }

    /// Allocate a region holding a little-endian `u32` length followed by
    /// `bytes`.
    pub fn write_length_prefixed(&mut self, bytes: &[u8]) -> Result<Address> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| BridgeError::OutOfMemory { requested: u32::MAX })?;
        self.allocate_filled(len.saturating_add(4), |memory, address| {
            memory.write(address, &len.to_le_bytes())?;
            memory.write(address + 4, bytes)
        })
    }

    /// Allocate `size` bytes and initialise them with `fill`. The block is
    /// released again if `fill` fails.
    fn allocate_filled(
        &mut self,
        size: u32,
        fill: impl FnOnce(&mut Self, Address) -> Result<()>,
    ) -> Result<Address> {
        let address = self.allocate(size)?;
        if let Err(err) = fill(self, address) {
            self.release(address);
            return Err(err);
        }
        Ok(address)
    }

    /// Read a region written by [`Memory::write_length_prefixed`].
    pub fn read_length_prefixed(&self, address: Address) -> Result<&[u8]> {
        let header = self.read_at(address, 4)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        self.read_at(address + 4, len)
    }

    pub fn read(&self, buffer: ManagedBuffer) -> Result<&[u8]> {
        self.read_at(buffer.address, buffer.size)
    }

    pub fn read_at(&self, address: Address, size: u32) -> Result<&[u8]> {
        let start = address as usize;
        let end = start + size as usize;
        self.allocator
            .heap()
            .get(start..end)
            .ok_or(BridgeError::InvalidAccess { address, size })
    }

    pub fn write(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        let start = address as usize;
        let end = start + bytes.len();
        let dest = self
            .allocator
            .heap_mut()
            .get_mut(start..end)
            .ok_or(BridgeError::InvalidAccess {
                address,
                size: bytes.len() as u32,
            })?;
        dest.copy_from_slice(bytes);
        Ok(())
    }

    pub fn stats(&self) -> AllocationStats {
        self.stats
    }

    pub fn is_live(&self, address: Address) -> bool {
        self.live.contains_key(&address)
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(Box::new(LinearMemory::default()))
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory").field("stats", &self.stats).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_text_without_terminator() {
        let mut memory = Memory::default();
        let buffer = memory.copy_into("(module)").unwrap();
        assert_eq!(buffer.size, 8);
        assert_eq!(memory.read(buffer).unwrap(), b"(module)");
    }

    #[test]
    fn copies_bytes_exactly() {
        let mut memory = Memory::default();
        let bytes = vec![0x00, 0x61, 0x73, 0x6d];
        let buffer = memory.copy_into(&bytes).unwrap();
        assert_eq!(memory.read(buffer).unwrap(), &bytes[..]);

        let empty = memory.copy_into(&[] as &[u8]).unwrap();
        assert!(empty.is_empty());
        assert_ne!(empty.address, 0);
    }

    #[test]
    fn cstr_includes_terminator() {
        let mut memory = Memory::default();
        let buffer = memory.copy_cstr("a.wast").unwrap();
        assert_eq!(buffer.size, 7);
        assert_eq!(memory.read(buffer).unwrap(), b"a.wast\0");
    }

    #[test]
    fn length_prefixed_round_trip() {
        let mut memory = Memory::default();
        let address = memory.write_length_prefixed(b"hello").unwrap();
        assert_eq!(memory.read_length_prefixed(address).unwrap(), b"hello");
    }

    #[test]
    fn null_allocation_is_out_of_memory() {
        let mut memory = Memory::new(Box::new(LinearMemory::new(1, 1)));
        let err = memory.copy_into(&vec![0u8; 2 * PAGE_SIZE]).unwrap_err();
        assert!(matches!(err, BridgeError::OutOfMemory { .. }));
        assert!(memory.stats().is_balanced());
    }

    #[test]
    fn ledger_tracks_releases() {
        let mut memory = Memory::default();
        let a = memory.allocate(10).unwrap();
        let b = memory.allocate(20).unwrap();
        assert_eq!(memory.stats().live, 2);
        assert_eq!(memory.stats().live_bytes, 30);

        memory.release(a);
        memory.release(b);
        assert!(memory.stats().is_balanced());
        assert_eq!(memory.stats().peak_live_bytes, 30);

        memory.release(a);
        assert_eq!(memory.stats().invalid_releases, 1);
        assert!(!memory.stats().is_balanced());
    }

    /// Hands out addresses past the end of a tiny heap.
    struct Overhanging {
        heap: Vec<u8>,
        frees: usize,
    }

    impl Allocator for Overhanging {
        fn malloc(&mut self, _size: u32) -> Address {
            8
        }

        fn free(&mut self, _address: Address) {
            self.frees += 1;
        }

        fn heap(&self) -> &[u8] {
            &self.heap
        }

        fn heap_mut(&mut self) -> &mut [u8] {
            &mut self.heap
        }
    }

    #[test]
    fn failed_initialisation_releases_the_block() {
        let mut memory = Memory::new(Box::new(Overhanging {
            heap: vec![0; 16],
            frees: 0,
        }));

        let err = memory.copy_into(&[1u8; 32]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidAccess { .. }));
        assert!(memory.stats().is_balanced());

        assert!(memory.copy_cstr(&"x".repeat(32)).is_err());
        assert!(memory.write_length_prefixed(&[0u8; 32]).is_err());

        let stats = memory.stats();
        assert!(stats.is_balanced());
        assert_eq!(stats.allocations, 3);
        assert_eq!(stats.releases, 3);
    }

    #[test]
    fn out_of_range_reads_fail() {
        let memory = Memory::default();
        let err = memory.read_at(u32::MAX - 4, 16).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidAccess { .. }));
    }
}
