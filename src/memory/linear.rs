//! Default arena allocator: a growable linear heap.

use std::collections::{BTreeMap, HashMap};

use super::Address;

/// Size of one heap page.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Every block is aligned (and sized) to this many bytes.
const ALIGN: u32 = 8;

/// Low-level allocator behind [`Memory`](super::Memory).
///
/// Mirrors a C `malloc`/`free` pair over a flat heap: a failed allocation
/// returns the null address `0` instead of an error.
pub trait Allocator {
    /// Allocate `size` bytes, returning `0` on failure.
    fn malloc(&mut self, size: u32) -> Address;

    /// Free a block previously returned by `malloc`.
    fn free(&mut self, address: Address);

    /// The whole heap.
    fn heap(&self) -> &[u8];

    /// The whole heap, mutably.
    fn heap_mut(&mut self) -> &mut [u8];
}

/// First-fit allocator over a `Vec<u8>` that grows page by page up to a
/// configured limit.
#[derive(Debug)]
pub struct LinearMemory {
    heap: Vec<u8>,
    max_pages: usize,
    /// Next never-used address.
    top: u32,
    /// Live blocks: address -> rounded size.
    used: HashMap<Address, u32>,
    /// Freed blocks below `top`: address -> size. Neighbours are coalesced.
    free_blocks: BTreeMap<Address, u32>,
}

impl LinearMemory {
    pub fn new(initial_pages: usize, max_pages: usize) -> Self {
        let max_pages = max_pages.max(1);
        let initial_pages = initial_pages.clamp(1, max_pages);
        Self {
            heap: vec![0; initial_pages * PAGE_SIZE],
            max_pages,
            // Address 0 is null, keep the first aligned slot unused.
            top: ALIGN,
            used: HashMap::new(),
            free_blocks: BTreeMap::new(),
        }
    }

    pub fn pages(&self) -> usize {
        self.heap.len() / PAGE_SIZE
    }

    fn take_free_block(&mut self, size: u32) -> Option<Address> {
        let (&address, &block) = self.free_blocks.iter().find(|(_, block)| **block >= size)?;
        self.free_blocks.remove(&address);
        if block > size {
            self.free_blocks.insert(address + size, block - size);
        }
        Some(address)
    }

    fn bump(&mut self, size: u32) -> Option<Address> {
        let address = self.top;
        let end = address.checked_add(size)? as usize;
        if end > self.heap.len() {
            let pages = end.div_ceil(PAGE_SIZE);
            if pages > self.max_pages {
                return None;
            }
            self.heap.resize(pages * PAGE_SIZE, 0);
        }
        self.top = end as u32;
        Some(address)
    }

    fn coalesce(&mut self, mut address: Address, mut size: u32) {
        if let Some((&prev, &prev_size)) = self.free_blocks.range(..address).next_back() {
            if prev + prev_size == address {
                self.free_blocks.remove(&prev);
                address = prev;
                size += prev_size;
            }
        }
        if let Some(next_size) = self.free_blocks.remove(&(address + size)) {
            size += next_size;
        }
        if address + size == self.top {
            // Give the tail back to the bump region.
            self.top = address;
        } else {
            self.free_blocks.insert(address, size);
        }
    }
}

impl Default for LinearMemory {
    fn default() -> Self {
        Self::new(1, 16 * 1024)
    }
}

impl Allocator for LinearMemory {
    fn malloc(&mut self, size: u32) -> Address {
        let Some(rounded) = size.max(1).checked_next_multiple_of(ALIGN) else {
            return 0;
        };
        let address = match self.take_free_block(rounded) {
            Some(address) => address,
            None => match self.bump(rounded) {
                Some(address) => address,
                None => return 0,
            },
        };
        self.used.insert(address, rounded);
        address
    }

    fn free(&mut self, address: Address) {
        if let Some(size) = self.used.remove(&address) {
            self.coalesce(address, size);
        }
    }

    fn heap(&self) -> &[u8] {
        &self.heap
    }

    fn heap_mut(&mut self) -> &mut [u8] {
        &mut self.heap
    }
}
