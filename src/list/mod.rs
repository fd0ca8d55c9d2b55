//! The balanced multi-page list.
//!
//! Items of one fixed-size record type are spread over a doubly-linked
//! chain of pages. Inserting into a full page splits it in two; removing
//! from a page that falls below half occupancy borrows an item from a
//! richer neighbour or merges with one, returning the emptied page to the
//! pool. The chain endpoints and the total count live in a [`ListState`]
//! record embedded wherever the application placed it, typically the
//! start region.
//!
//! Mutating operations are two-phase: every step that can fail (page
//! allocation, first-time page reads) happens before any link field or
//! item array is touched, so a failed insert or remove leaves the chain
//! exactly as it was.

use std::marker::PhantomData;

use crate::{
    error::{Error, Result},
    page::PageHandle,
    pool::{PageNumber, Pool, NIL_PAGE},
    ptr::{Ptr, Record},
};

pub(crate) mod node;

pub use node::ListState;

use node::{max_capacity, min_capacity, NodeMut, NodeRef};

/// Statistics gathered by a chain walk; see [`List::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStats {
    /// Pages in the chain.
    pub pages: usize,
    /// Items over all pages; equals the recorded length.
    pub items: u64,
}

/// An ordered sequence of `T` records distributed across pages.
///
/// The list is a view: it holds a pool reference and a far pointer to its
/// state record, nothing else. Copying it is copying the view.
pub struct List<'p, T> {
    pool: &'p Pool,
    state: Ptr<ListState>,
    _marker: PhantomData<fn() -> T>,
}

impl<'p, T> Clone for List<'p, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'p, T> Copy for List<'p, T> {}

impl<'p, T: Record> List<'p, T> {
    fn max_cap() -> usize {
        max_capacity(T::SIZE)
    }

    fn min_cap() -> usize {
        min_capacity(T::SIZE)
    }

    fn check_item_size() {
        assert!(
            T::SIZE > 0 && max_capacity(T::SIZE) >= 2,
            "item type too large to page"
        );
    }

    /// Bind a list to existing state.
    pub fn open(pool: &'p Pool, state: Ptr<ListState>) -> Self {
        Self::check_item_size();
        List {
            pool,
            state,
            _marker: PhantomData,
        }
    }

    /// Initialize `state` to the empty list and bind to it.
    pub fn create(pool: &'p Pool, state: Ptr<ListState>) -> Result<Self> {
        Self::check_item_size();
        let mut page = pool.map(state.page_number())?;
        state.store(&mut page, &ListState::empty());
        Ok(List {
            pool,
            state,
            _marker: PhantomData,
        })
    }

    fn load_state(&self) -> Result<(PageHandle, ListState)> {
        let page = self.pool.map(self.state.page_number())?;
        let st = self.state.load(&page);
        Ok((page, st))
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.load_state()?.1.len)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // Walk the chain to the page containing `index`, from whichever end is
    // closer. `index == len` addresses the back page's one-past-the-end
    // slot.
    fn locate(&self, st: &ListState, index: u64) -> Result<(PageHandle, usize)> {
        debug_assert!(index <= st.len && !st.front.is_nil());
        if index <= st.len / 2 {
            let mut pn = st.front;
            let mut skipped: u64 = 0;
            loop {
                let page = self.pool.map(pn)?;
                let (count, next) = {
                    let node = NodeRef(&page[..]);
                    (node.count() as u64, node.next())
                };
                if index < skipped + count || (index == skipped + count && next.is_nil()) {
                    return Ok((page, (index - skipped) as usize));
                }
                skipped += count;
                assert!(!next.is_nil(), "chain ended before the indexed item");
                pn = next;
            }
        } else {
            let mut pn = st.back;
            let mut end = st.len;
            loop {
                let page = self.pool.map(pn)?;
                let (count, prev) = {
                    let node = NodeRef(&page[..]);
                    (node.count() as u64, node.prev())
                };
                let start = end - count;
                if index >= start {
                    return Ok((page, (index - start) as usize));
                }
                assert!(!prev.is_nil(), "chain ended before the indexed item");
                pn = prev;
                end = start;
            }
        }
    }

    /// Insert `value` at `index`, shifting subsequent items.
    pub fn insert(&mut self, index: u64, value: &T) -> Result<()> {
        let (mut state_page, mut st) = self.load_state()?;
        if index > st.len {
            return Err(Error::InvalidArgument("list index out of range"));
        }

        if st.front.is_nil() {
            // the first item allocates the first page
            let pn = self.pool.allocate()?;
            let mut page = match self.pool.map_zeroed(pn) {
                Ok(p) => p,
                Err(e) => {
                    // UNWRAP: a just-allocated page is a valid
                    // deallocation target.
                    self.pool.deallocate(pn).unwrap();
                    return Err(e);
                }
            };
            let mut node = NodeMut(&mut page[..]);
            node.init(NIL_PAGE, NIL_PAGE);
            value.encode_to(node.insert_slot(0, T::SIZE));
            st = ListState {
                front: pn,
                back: pn,
                len: 1,
            };
            self.state.store(&mut state_page, &st);
            return Ok(());
        }

        let (mut page, slot) = self.locate(&st, index)?;
        let count = NodeRef(&page[..]).count();

        if count < Self::max_cap() {
            let mut node = NodeMut(&mut page[..]);
            value.encode_to(node.insert_slot(slot, T::SIZE));
            st.len += 1;
            self.state.store(&mut state_page, &st);
            return Ok(());
        }

        // The page is full: split. Acquire the successor mapping and the
        // new page first; below that point nothing can fail.
        let succ_pn = NodeRef(&page[..]).next();
        let succ_page = if succ_pn.is_nil() {
            None
        } else {
            Some(self.pool.map(succ_pn)?)
        };
        let new_pn = self.pool.allocate()?;
        let mut new_page = match self.pool.map_zeroed(new_pn) {
            Ok(p) => p,
            Err(e) => {
                // UNWRAP: a just-allocated page is a valid deallocation
                // target.
                self.pool.deallocate(new_pn).unwrap();
                return Err(e);
            }
        };

        // Move the upper half of the items into the new page and relink.
        let keep = (Self::max_cap() + 1) / 2;
        {
            let src = NodeRef(&page[..]);
            let mut dst = NodeMut(&mut new_page[..]);
            dst.init(page.page_number(), succ_pn);
            dst.push_items(T::SIZE, src.item_range(keep, count, T::SIZE));
        }
        {
            let mut node = NodeMut(&mut page[..]);
            node.truncate_items(count - keep);
            node.set_next(new_pn);
        }
        match succ_page {
            Some(mut sp) => NodeMut(&mut sp[..]).set_prev(new_pn),
            None => st.back = new_pn,
        }

        // Insert into whichever half owns the slot.
        if slot <= keep {
            let mut node = NodeMut(&mut page[..]);
            value.encode_to(node.insert_slot(slot, T::SIZE));
        } else {
            let mut node = NodeMut(&mut new_page[..]);
            value.encode_to(node.insert_slot(slot - keep, T::SIZE));
        }
        st.len += 1;
        self.state.store(&mut state_page, &st);
        Ok(())
    }

    /// Remove and return the item at `index`.
    pub fn remove(&mut self, index: u64) -> Result<T> {
        let (mut state_page, mut st) = self.load_state()?;
        if index >= st.len {
            return Err(Error::InvalidArgument("list index out of range"));
        }
        let (mut page, slot) = self.locate(&st, index)?;
        let pn = page.page_number();
        let (count, prev_pn, next_pn) = {
            let node = NodeRef(&page[..]);
            (node.count(), node.prev(), node.next())
        };
        let value = T::decode(NodeRef(&page[..]).item(slot, T::SIZE));

        if st.front == st.back {
            // the sole page: no occupancy floor, and emptying it resets
            // the list to its terminal empty state
            NodeMut(&mut page[..]).remove_item(slot, T::SIZE);
            st.len -= 1;
            if count == 1 {
                // UNWRAP: the sole chain page is a valid deallocation
                // target.
                self.pool.deallocate(pn).unwrap();
                st = ListState::empty();
            }
            self.state.store(&mut state_page, &st);
            return Ok(value);
        }

        if count - 1 >= Self::min_cap() {
            NodeMut(&mut page[..]).remove_item(slot, T::SIZE);
            st.len -= 1;
            self.state.store(&mut state_page, &st);
            return Ok(value);
        }

        // Underflow: borrow from a richer neighbour if one exists, else
        // merge with one. Map everything the repair touches before
        // mutating anything.
        let min = Self::min_cap();
        let mut next_page = if next_pn.is_nil() {
            None
        } else {
            Some(self.pool.map(next_pn)?)
        };
        if let Some(next) = next_page.as_mut() {
            if NodeRef(&next[..]).count() > min {
                // move the successor's first item onto this page's tail
                NodeMut(&mut page[..]).remove_item(slot, T::SIZE);
                NodeMut(&mut page[..]).push_items(T::SIZE, NodeRef(&next[..]).item(0, T::SIZE));
                NodeMut(&mut next[..]).drain_front(1, T::SIZE);
                st.len -= 1;
                self.state.store(&mut state_page, &st);
                return Ok(value);
            }
        }
        let mut prev_page = if prev_pn.is_nil() {
            None
        } else {
            Some(self.pool.map(prev_pn)?)
        };
        if let Some(prev) = prev_page.as_mut() {
            let prev_count = NodeRef(&prev[..]).count();
            if prev_count > min {
                // move the predecessor's last item onto this page's front
                NodeMut(&mut page[..]).remove_item(slot, T::SIZE);
                {
                    let mut node = NodeMut(&mut page[..]);
                    let hole = node.insert_slot(0, T::SIZE);
                    hole.copy_from_slice(NodeRef(&prev[..]).item(prev_count - 1, T::SIZE));
                }
                NodeMut(&mut prev[..]).truncate_items(1);
                st.len -= 1;
                self.state.store(&mut state_page, &st);
                return Ok(value);
            }
        }

        // No neighbour has surplus: merge.
        if let Some(mut next) = next_page {
            // pull the successor's items onto this page and free it
            let after_pn = NodeRef(&next[..]).next();
            let after_page = if after_pn.is_nil() {
                None
            } else {
                Some(self.pool.map(after_pn)?)
            };
            NodeMut(&mut page[..]).remove_item(slot, T::SIZE);
            {
                let next_count = NodeRef(&next[..]).count();
                NodeMut(&mut page[..])
                    .push_items(T::SIZE, NodeRef(&next[..]).item_range(0, next_count, T::SIZE));
            }
            NodeMut(&mut page[..]).set_next(after_pn);
            match after_page {
                Some(mut ap) => NodeMut(&mut ap[..]).set_prev(pn),
                None => st.back = pn,
            }
            // UNWRAP: a chain page is a valid deallocation target.
            self.pool.deallocate(next_pn).unwrap();
        } else {
            // this is the back page; fold it into its predecessor
            let mut prev = prev_page.expect("a non-sole page has at least one neighbour");
            NodeMut(&mut page[..]).remove_item(slot, T::SIZE);
            {
                let remaining = NodeRef(&page[..]).count();
                NodeMut(&mut prev[..])
                    .push_items(T::SIZE, NodeRef(&page[..]).item_range(0, remaining, T::SIZE));
            }
            NodeMut(&mut prev[..]).set_next(NIL_PAGE);
            st.back = prev_pn;
            // UNWRAP: as above.
            self.pool.deallocate(pn).unwrap();
        }
        st.len -= 1;
        self.state.store(&mut state_page, &st);
        Ok(value)
    }

    pub fn push_back(&mut self, value: &T) -> Result<()> {
        let len = self.len()?;
        self.insert(len, value)
    }

    pub fn push_front(&mut self, value: &T) -> Result<()> {
        self.insert(0, value)
    }

    pub fn pop_back(&mut self) -> Result<Option<T>> {
        let len = self.len()?;
        if len == 0 {
            return Ok(None);
        }
        self.remove(len - 1).map(Some)
    }

    pub fn pop_front(&mut self) -> Result<Option<T>> {
        if self.len()? == 0 {
            return Ok(None);
        }
        self.remove(0).map(Some)
    }

    /// The item at `index`, or `None` past the end.
    pub fn get(&self, index: u64) -> Result<Option<T>> {
        let (_state_page, st) = self.load_state()?;
        if index >= st.len {
            return Ok(None);
        }
        let (page, slot) = self.locate(&st, index)?;
        Ok(Some(T::decode(NodeRef(&page[..]).item(slot, T::SIZE))))
    }

    /// A double-ended iterator over the items, front to back.
    ///
    /// The cursor walks the page chain lazily. Any structural mutation of
    /// the list invalidates iterators created before it; this is a
    /// contract, not something the iterator detects.
    pub fn iter(&self) -> Result<Iter<'p, T>> {
        let (_state_page, st) = self.load_state()?;
        Ok(Iter {
            list: *self,
            front: (st.front, 0),
            back: (st.back, BACK_UNRESOLVED),
            remaining: st.len,
            front_page: None,
            back_page: None,
        })
    }

    /// Remove every item and return every chain page to the pool.
    pub fn clear(&mut self) -> Result<()> {
        let (mut state_page, st) = self.load_state()?;
        // collect the chain first; deallocation starts only once the
        // whole walk has succeeded
        let mut pages = Vec::new();
        let mut pn = st.front;
        while !pn.is_nil() {
            let page = self.pool.map(pn)?;
            pages.push(pn);
            assert!(
                pages.len() as u64 <= st.len,
                "chain longer than the recorded item count"
            );
            pn = NodeRef(&page[..]).next();
        }
        for pn in pages {
            // UNWRAP: chain pages are valid deallocation targets.
            self.pool.deallocate(pn).unwrap();
        }
        self.state.store(&mut state_page, &ListState::empty());
        Ok(())
    }

    /// Walk the whole chain, checking linkage and occupancy against the
    /// recorded state. Structural inconsistencies abort; I/O failures
    /// propagate.
    pub fn validate(&self) -> Result<ChainStats> {
        let (_state_page, st) = self.load_state()?;
        validate_chain(self.pool, &st, T::SIZE)
    }
}

const BACK_UNRESOLVED: usize = usize::MAX;

/// Iterator over list items; see [`List::iter`].
pub struct Iter<'p, T> {
    list: List<'p, T>,
    front: (PageNumber, usize),
    back: (PageNumber, usize),
    remaining: u64,
    front_page: Option<PageHandle>,
    back_page: Option<PageHandle>,
}

impl<'p, T: Record> Iterator for Iter<'p, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        if self.remaining == 0 {
            return None;
        }
        loop {
            if self
                .front_page
                .as_ref()
                .map_or(true, |p| p.page_number() != self.front.0)
            {
                match self.list.pool.map(self.front.0) {
                    Ok(p) => self.front_page = Some(p),
                    Err(e) => {
                        self.remaining = 0;
                        return Some(Err(e));
                    }
                }
            }
            // UNWRAP: mapped just above.
            let page = self.front_page.as_ref().unwrap();
            let node = NodeRef(&page[..]);
            if self.front.1 >= node.count() {
                let next = node.next();
                assert!(!next.is_nil(), "chain ended with items remaining");
                self.front = (next, 0);
                continue;
            }
            let value = T::decode(node.item(self.front.1, T::SIZE));
            self.front.1 += 1;
            self.remaining -= 1;
            return Some(Ok(value));
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

impl<'p, T: Record> DoubleEndedIterator for Iter<'p, T> {
    fn next_back(&mut self) -> Option<Result<T>> {
        if self.remaining == 0 {
            return None;
        }
        if self
            .back_page
            .as_ref()
            .map_or(true, |p| p.page_number() != self.back.0)
        {
            match self.list.pool.map(self.back.0) {
                Ok(p) => self.back_page = Some(p),
                Err(e) => {
                    self.remaining = 0;
                    return Some(Err(e));
                }
            }
        }
        // UNWRAP: mapped just above.
        let page = self.back_page.as_ref().unwrap();
        let node = NodeRef(&page[..]);
        if self.back.1 == BACK_UNRESOLVED {
            let count = node.count();
            assert!(count >= 1, "empty page in the chain");
            self.back.1 = count - 1;
        }
        let value = T::decode(node.item(self.back.1, T::SIZE));
        self.remaining -= 1;
        if self.remaining > 0 {
            if self.back.1 == 0 {
                let prev = node.prev();
                assert!(!prev.is_nil(), "chain ended with items remaining");
                self.back = (prev, BACK_UNRESOLVED);
            } else {
                self.back.1 -= 1;
            }
        }
        Some(Ok(value))
    }
}

impl<'p, T: Record> ExactSizeIterator for Iter<'p, T> {}

// Shared by lists and strings: walk a chain checking linkage, occupancy
// and the total count.
pub(crate) fn validate_chain(pool: &Pool, st: &ListState, item_size: usize) -> Result<ChainStats> {
    if st.front.is_nil() {
        assert!(st.back.is_nil(), "empty chain with a back page");
        assert_eq!(st.len, 0, "empty chain with a nonzero length");
        return Ok(ChainStats { pages: 0, items: 0 });
    }
    let max = max_capacity(item_size);
    let min = min_capacity(item_size);
    let mut pages = 0usize;
    let mut items = 0u64;
    let mut prev = NIL_PAGE;
    let mut pn = st.front;
    loop {
        let page = pool.map(pn)?;
        let node = NodeRef(&page[..]);
        assert_eq!(node.prev(), prev, "prev link does not match the walk");
        let count = node.count();
        assert!(count >= 1, "empty page left in the chain");
        assert!(count <= max, "page holds more than its capacity");
        let next = node.next();
        let interior = !prev.is_nil() && !next.is_nil();
        assert!(
            !interior || count >= min,
            "interior page below minimum occupancy"
        );
        pages += 1;
        items += count as u64;
        assert!(
            items <= st.len,
            "chain holds more items than the recorded length"
        );
        if next.is_nil() {
            assert_eq!(pn, st.back, "chain ends away from the recorded back page");
            break;
        }
        assert_ne!(next, pn, "page links to itself");
        prev = pn;
        pn = next;
    }
    assert_eq!(items, st.len, "recorded length does not match the chain");
    Ok(ChainStats { pages, items })
}
