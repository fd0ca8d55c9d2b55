//! On-page layout of chain nodes.
//!
//! A node page is laid out in the following form:
//! + prev page : u32
//! + next page : u32
//! + item count : u16
//! + items : `[[u8; item_size]; item count]`
//!
//! Items are packed immediately after the header, in order. Pages holding
//! list or string contents all use this layout; only the item size varies.

use crate::{
    io::PAGE_SIZE,
    pool::{PageNumber, NIL_PAGE},
    ptr::Record,
};

/// Bytes of a node page taken by the header.
pub(crate) const NODE_HEADER_SIZE: usize = 10;

/// The most items of `item_size` bytes a single page can hold.
pub(crate) const fn max_capacity(item_size: usize) -> usize {
    (PAGE_SIZE - NODE_HEADER_SIZE) / item_size
}

/// The fewest items an interior page may hold after a mutation completes.
pub(crate) const fn min_capacity(item_size: usize) -> usize {
    max_capacity(item_size) / 2
}

/// The persisted root record of a multi-page chain: the endpoints of the
/// page chain and the total item count. Embedded wherever the application
/// places it, typically in the start region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListState {
    pub front: PageNumber,
    pub back: PageNumber,
    pub len: u64,
}

impl ListState {
    pub fn empty() -> Self {
        ListState {
            front: NIL_PAGE,
            back: NIL_PAGE,
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.front.is_nil()
    }
}

impl Record for ListState {
    const SIZE: usize = 16;

    fn encode_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.front.0.to_le_bytes());
        buf[4..8].copy_from_slice(&self.back.0.to_le_bytes());
        buf[8..16].copy_from_slice(&self.len.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        ListState {
            front: PageNumber(u32::from_le_bytes(buf[0..4].try_into().unwrap())),
            back: PageNumber(u32::from_le_bytes(buf[4..8].try_into().unwrap())),
            len: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}

pub(crate) struct NodeRef<'a>(pub &'a [u8]);
pub(crate) struct NodeMut<'a>(pub &'a mut [u8]);

impl<'a> NodeRef<'a> {
    pub fn prev(&self) -> PageNumber {
        PageNumber(u32::from_le_bytes(self.0[0..4].try_into().unwrap()))
    }

    pub fn next(&self) -> PageNumber {
        PageNumber(u32::from_le_bytes(self.0[4..8].try_into().unwrap()))
    }

    pub fn count(&self) -> usize {
        u16::from_le_bytes(self.0[8..10].try_into().unwrap()) as usize
    }

    pub fn item(&self, i: usize, item_size: usize) -> &'a [u8] {
        self.item_range(i, i + 1, item_size)
    }

    pub fn item_range(&self, from: usize, to: usize, item_size: usize) -> &'a [u8] {
        debug_assert!(from <= to && to <= self.count());
        let bytes: &'a [u8] = self.0;
        &bytes[NODE_HEADER_SIZE + from * item_size..NODE_HEADER_SIZE + to * item_size]
    }
}

impl<'a> NodeMut<'a> {
    pub fn as_ref(&self) -> NodeRef<'_> {
        NodeRef(&self.0[..])
    }

    pub fn init(&mut self, prev: PageNumber, next: PageNumber) {
        self.set_prev(prev);
        self.set_next(next);
        self.set_count(0);
    }

    pub fn set_prev(&mut self, prev: PageNumber) {
        self.0[0..4].copy_from_slice(&prev.0.to_le_bytes());
    }

    pub fn set_next(&mut self, next: PageNumber) {
        self.0[4..8].copy_from_slice(&next.0.to_le_bytes());
    }

    pub fn set_count(&mut self, count: usize) {
        self.0[8..10].copy_from_slice(&(count as u16).to_le_bytes());
    }

    /// Open a hole for one item at `i`, shifting the tail of the array
    /// right, and return the hole for the caller to fill.
    pub fn insert_slot(&mut self, i: usize, item_size: usize) -> &mut [u8] {
        let count = self.as_ref().count();
        assert!(i <= count);
        let start = NODE_HEADER_SIZE + i * item_size;
        let end = NODE_HEADER_SIZE + count * item_size;
        assert!(end + item_size <= PAGE_SIZE, "node page overflow");
        self.0.copy_within(start..end, start + item_size);
        self.set_count(count + 1);
        &mut self.0[start..start + item_size]
    }

    /// Remove the item at `i`, shifting the tail of the array left.
    pub fn remove_item(&mut self, i: usize, item_size: usize) {
        let count = self.as_ref().count();
        assert!(i < count);
        let start = NODE_HEADER_SIZE + i * item_size;
        let end = NODE_HEADER_SIZE + count * item_size;
        self.0.copy_within(start + item_size..end, start);
        self.set_count(count - 1);
    }

    /// Append raw item bytes at the end of the array.
    pub fn push_items(&mut self, item_size: usize, bytes: &[u8]) {
        assert_eq!(bytes.len() % item_size, 0);
        let count = self.as_ref().count();
        let start = NODE_HEADER_SIZE + count * item_size;
        assert!(start + bytes.len() <= PAGE_SIZE, "node page overflow");
        self.0[start..start + bytes.len()].copy_from_slice(bytes);
        self.set_count(count + bytes.len() / item_size);
    }

    /// Overwrite items in place, starting at `i`. The payload must stay
    /// within the occupied part of the array.
    pub fn write_items(&mut self, i: usize, item_size: usize, bytes: &[u8]) {
        let count = self.as_ref().count();
        assert_eq!(bytes.len() % item_size, 0);
        assert!(i * item_size + bytes.len() <= count * item_size);
        let start = NODE_HEADER_SIZE + i * item_size;
        self.0[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Drop the last `n` items.
    pub fn truncate_items(&mut self, n: usize) {
        let count = self.as_ref().count();
        assert!(n <= count);
        self.set_count(count - n);
    }

    /// Remove the first `n` items, shifting the rest down.
    pub fn drain_front(&mut self, n: usize, item_size: usize) {
        let count = self.as_ref().count();
        assert!(n <= count);
        self.0.copy_within(
            NODE_HEADER_SIZE + n * item_size..NODE_HEADER_SIZE + count * item_size,
            NODE_HEADER_SIZE,
        );
        self.set_count(count - n);
    }
}
