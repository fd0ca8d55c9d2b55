//! Scoped page access.

use std::{
    ops::{Deref, DerefMut},
    ptr::NonNull,
    sync::Arc,
};

use crate::{
    io::PageBuf,
    pool::{PageNumber, PoolId, PoolShared},
};

/// A scoped, reference-counted view of one mapped page.
///
/// The handle dereferences to the page's bytes. All handles for one page
/// within one pool share a single buffer, so writes through any handle are
/// immediately visible through the others; avoiding simultaneous mutation
/// of the same page through two handles is the caller's contract, exactly
/// as with the raw pointers this type stands in for. Moving a handle
/// transfers the mapping; there is no way to double-release.
///
/// Dropping the last handle for a page writes the page back to the store
/// if it was mutated. Write-back failures on this path are reported to the
/// diagnostic sink and swallowed.
pub struct PageHandle {
    shared: Arc<PoolShared>,
    pn: PageNumber,
    buf: NonNull<PageBuf>,
}

impl PageHandle {
    pub(crate) fn new(shared: Arc<PoolShared>, pn: PageNumber, buf: NonNull<PageBuf>) -> Self {
        PageHandle { shared, pn, buf }
    }

    /// The position of the mapped page.
    pub fn page_number(&self) -> PageNumber {
        self.pn
    }

    /// The pool this handle was mapped from.
    pub fn pool_id(&self) -> PoolId {
        self.shared.pool_id()
    }
}

impl Deref for PageHandle {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        // SAFETY: the buffer lives until the last handle for this page
        // drops, and this handle keeps the pool state alive.
        unsafe { &self.buf.as_ref().0 }
    }
}

impl DerefMut for PageHandle {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.shared.mark_dirty(self.pn);
        // SAFETY: as above; exclusive mutation is the caller's contract.
        unsafe { &mut self.buf.as_mut().0 }
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        self.shared.unmap(self.pn);
    }
}
