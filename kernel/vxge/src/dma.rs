//! Descriptor memory.
//!
//! The core never maps memory itself. It asks a [`DmaAllocator`] for DMA-able regions
//! and carves them into fixed-size descriptor blocks, which are chained together through
//! the link field at the end of every block, the way the adapter walks them.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr::NonNull;
use vxge_descriptors::{DmaAddress, DESCRIPTOR_BLOCK_SIZE, DESCRIPTOR_BLOCK_LINK_SIZE};
use crate::error::VxgeError;


/// A region of memory that both the host and the adapter can access.
///
/// The region is released when the object is dropped.
pub trait DmaMemory: Send {
    /// The host virtual address of the start of the region.
    fn virt_addr(&self) -> NonNull<u8>;
    /// The address the adapter uses to reach the start of the region.
    fn phys_addr(&self) -> DmaAddress;
    fn size_in_bytes(&self) -> usize;
}

/// The capability to obtain zeroed, DMA-able memory.
pub trait DmaAllocator {
    /// Allocates a region of at least `size_in_bytes` bytes, aligned to at least 8 bytes.
    fn allocate(&self, size_in_bytes: usize) -> Result<Box<dyn DmaMemory>, &'static str>;
}


/// Largest region requested for items that need no block links.
const UNLINKED_BLOCK_SIZE: usize = 16 * DESCRIPTOR_BLOCK_SIZE;

fn round_up(size: usize, align: usize) -> usize {
    (size + align - 1) / align * align
}


/// An array of equally-sized items (descriptors or descriptor lists) spread across
/// one or more DMA blocks.
pub(crate) struct DescriptorArena {
    blocks: Vec<Box<dyn DmaMemory>>,
    item_size: usize,
    items_per_block: usize,
    len: usize,
}

impl DescriptorArena {
    /// Allocates room for `len` items of `item_size` bytes.
    ///
    /// Without links, items are packed back to back into regions of up to 64 KiB.
    /// When `linked` is true, items are packed into standard descriptor blocks whose last bytes
    /// hold the address of the next block, and the last block points back at the first.
    pub(crate) fn new(
        allocator: &dyn DmaAllocator,
        len: usize,
        item_size: usize,
        linked: bool,
    ) -> Result<DescriptorArena, VxgeError> {
        if len == 0 || item_size == 0 || item_size % 8 != 0 {
            return Err(VxgeError::InvalidConfig("descriptor arena needs a non-zero, 8-byte multiple item size"));
        }
        let (block_size, items_per_block) = if linked {
            let per_block = (DESCRIPTOR_BLOCK_SIZE - DESCRIPTOR_BLOCK_LINK_SIZE) / item_size;
            if per_block == 0 {
                return Err(VxgeError::InvalidConfig("descriptor does not fit in a descriptor block"));
            }
            (DESCRIPTOR_BLOCK_SIZE, per_block)
        } else {
            // as many whole items as fit in an unlinked block, at least one, in whole pages
            let per_block = (UNLINKED_BLOCK_SIZE / item_size).max(1).min(len);
            let block_size = round_up(per_block * item_size, DESCRIPTOR_BLOCK_SIZE);
            (block_size, block_size / item_size)
        };
        let block_count = (len + items_per_block - 1) / items_per_block;

        let mut blocks: Vec<Box<dyn DmaMemory>> = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            let block = allocator.allocate(block_size).map_err(|e| {
                error!("vxge: failed to allocate a {} byte descriptor block: {}", block_size, e);
                VxgeError::OutOfMemory
            })?;
            if block.size_in_bytes() < block_size || block.virt_addr().as_ptr() as usize % 8 != 0 {
                error!("vxge: allocator returned an undersized or misaligned descriptor block");
                return Err(VxgeError::OutOfMemory);
            }
            // SAFETY: the region is valid for `size_in_bytes` bytes and exclusively ours.
            unsafe { core::ptr::write_bytes(block.virt_addr().as_ptr(), 0, block_size); }
            blocks.push(block);
        }

        let arena = DescriptorArena { blocks, item_size, items_per_block, len };
        if linked {
            arena.link_blocks();
        }
        Ok(arena)
    }

    /// Writes the next-block address into the link field of every block.
    fn link_blocks(&self) {
        let count = self.blocks.len();
        for (i, block) in self.blocks.iter().enumerate() {
            let next = self.blocks[(i + 1) % count].phys_addr();
            let link = (DESCRIPTOR_BLOCK_SIZE - 8) as isize;
            // SAFETY: the link field lies within the block, past the last descriptor.
            unsafe {
                let ptr = block.virt_addr().as_ptr().offset(link) as *mut u64;
                core::ptr::write_volatile(ptr, next.value());
            }
        }
    }

    pub(crate) fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn items_per_block(&self) -> usize {
        self.items_per_block
    }

    /// The adapter-visible address of the first block.
    pub(crate) fn base_address(&self) -> DmaAddress {
        self.blocks.first().map(|b| b.phys_addr()).unwrap_or_default()
    }

    fn locate(&self, index: usize) -> Option<(&dyn DmaMemory, usize)> {
        if index >= self.len {
            return None;
        }
        let block = self.blocks.get(index / self.items_per_block)?;
        Some((&**block, (index % self.items_per_block) * self.item_size))
    }

    /// The adapter-visible address of item `index`.
    pub(crate) fn dma_address(&self, index: usize) -> Option<DmaAddress> {
        self.locate(index).map(|(block, offset)| block.phys_addr().offset(offset as u64))
    }

    /// Returns a raw pointer to item `index`, reinterpreted as a `T`.
    ///
    /// `T` must be a `#[repr(C)]` hardware layout of at most `item_size` bytes that is valid when zeroed.
    pub(crate) fn item_ptr<T>(&self, index: usize) -> Option<*mut T> {
        debug_assert!(core::mem::size_of::<T>() <= self.item_size);
        self.locate(index).map(|(block, offset)| {
            // SAFETY: `offset + item_size` never exceeds the block size, checked at construction.
            unsafe { block.virt_addr().as_ptr().add(offset) as *mut T }
        })
    }

    /// Drops every block, returning the memory to its allocator.
    pub(crate) fn release(&mut self) {
        self.blocks.clear();
        self.len = 0;
    }
}
