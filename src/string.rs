//! Multi-page byte strings with stream-style access.
//!
//! The same page-chain machinery as the list, specialized to byte items,
//! plus bulk append and read paths and a [`Stream`] cursor with
//! independent get and put positions implementing [`std::io::Read`] and
//! [`std::io::Write`].
//!
//! Bulk appends fill the back page and link in fully-packed fresh pages,
//! so the back page may sit below the occupancy floor that interior pages
//! keep; a write of any length reads back byte-for-byte regardless of how
//! many pages it was split over.

use std::io;

use crate::{
    error::{Error, Result},
    list::{
        node::{max_capacity, NodeMut, NodeRef},
        validate_chain, ChainStats, Iter, List, ListState,
    },
    page::PageHandle,
    pool::{PageNumber, Pool, NIL_PAGE},
    ptr::Ptr,
};

/// Bytes of payload a single chain page holds.
const BYTES_PER_PAGE: usize = max_capacity(1);

/// A byte sequence distributed across pages.
pub struct PagedString<'p> {
    pool: &'p Pool,
    state: Ptr<ListState>,
}

impl<'p> PagedString<'p> {
    /// Initialize `state` to the empty string and bind to it.
    pub fn create(pool: &'p Pool, state: Ptr<ListState>) -> Result<Self> {
        List::<u8>::create(pool, state)?;
        Ok(PagedString { pool, state })
    }

    /// Bind a string to existing state.
    pub fn open(pool: &'p Pool, state: Ptr<ListState>) -> Self {
        PagedString { pool, state }
    }

    fn as_list(&self) -> List<'p, u8> {
        List::open(self.pool, self.state)
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

    /// Append `bytes` at the end, linking in as many fresh pages as the
    /// payload needs. On allocation failure the string is untouched and
    /// any pages already taken go back to the free chain.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let (mut state_page, mut st) = self.load_state()?;

        let mut back_page = if st.back.is_nil() {
            None
        } else {
            Some(self.pool.map(st.back)?)
        };
        let room = back_page
            .as_ref()
            .map_or(0, |p| BYTES_PER_PAGE - NodeRef(&p[..]).count());
        let overflow = bytes.len().saturating_sub(room);
        let needed = overflow.div_ceil(BYTES_PER_PAGE);

        let mut fresh: Vec<PageHandle> = Vec::with_capacity(needed);
        for _ in 0..needed {
            let pn = match self.pool.allocate() {
                Ok(pn) => pn,
                Err(e) => {
                    self.rollback(&fresh);
                    return Err(e);
                }
            };
            match self.pool.map_zeroed(pn) {
                Ok(h) => fresh.push(h),
                Err(e) => {
                    // UNWRAP: a just-allocated page is a valid
                    // deallocation target.
                    self.pool.deallocate(pn).unwrap();
                    self.rollback(&fresh);
                    return Err(e);
                }
            }
        }

        // Nothing below can fail: fill the back page, then the fresh ones.
        let mut rest = bytes;
        if let Some(bp) = back_page.as_mut() {
            let take = room.min(rest.len());
            if take > 0 {
                NodeMut(&mut bp[..]).push_items(1, &rest[..take]);
                rest = &rest[take..];
            }
        }
        let mut last_pn = st.back;
        for mut h in fresh {
            let pn = h.page_number();
            let take = BYTES_PER_PAGE.min(rest.len());
            {
                let mut node = NodeMut(&mut h[..]);
                node.init(last_pn, NIL_PAGE);
                node.push_items(1, &rest[..take]);
            }
            rest = &rest[take..];
            match back_page.as_mut() {
                Some(bp) => NodeMut(&mut bp[..]).set_next(pn),
                None => st.front = pn,
            }
            st.back = pn;
            last_pn = pn;
            back_page = Some(h);
        }
        debug_assert!(rest.is_empty());
        st.len += bytes.len() as u64;
        self.state.store(&mut state_page, &st);
        Ok(())
    }

    fn rollback(&self, fresh: &[PageHandle]) {
        for h in fresh {
            // UNWRAP: these pages were just allocated and never linked.
            self.pool.deallocate(h.page_number()).unwrap();
        }
    }

    /// Read up to `buf.len()` bytes starting at `pos`. Returns the number
    /// of bytes read; short only at the end of the string.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let (_state_page, st) = self.load_state()?;
        if pos >= st.len || buf.is_empty() {
            return Ok(0);
        }
        self.read_span(&st, pos, buf, None).map(|(n, _)| n)
    }

    // Find the page containing byte `pos` and the absolute position of its
    // first byte. `hint` names a page known to start at or before `pos`.
    fn seek(
        &self,
        st: &ListState,
        pos: u64,
        hint: Option<(PageNumber, u64)>,
    ) -> Result<(PageNumber, u64)> {
        debug_assert!(pos < st.len);
        let (mut pn, mut start) = match hint {
            Some((hint_pn, hint_start)) if hint_start <= pos => (hint_pn, hint_start),
            _ => (st.front, 0),
        };
        loop {
            let page = self.pool.map(pn)?;
            let node = NodeRef(&page[..]);
            let count = node.count() as u64;
            if pos < start + count {
                return Ok((pn, start));
            }
            let next = node.next();
            assert!(!next.is_nil(), "chain ended before the addressed byte");
            start += count;
            pn = next;
        }
    }

    // Copy out bytes starting at `pos`; returns the count read and the
    // page the read ended in, usable as a later `seek` hint.
    fn read_span(
        &self,
        st: &ListState,
        pos: u64,
        buf: &mut [u8],
        hint: Option<(PageNumber, u64)>,
    ) -> Result<(usize, (PageNumber, u64))> {
        let (mut pn, mut start) = self.seek(st, pos, hint)?;
        let mut pos = pos;
        let mut read = 0usize;
        loop {
            let page = self.pool.map(pn)?;
            let node = NodeRef(&page[..]);
            let count = node.count();
            let in_page = (pos - start) as usize;
            let take = (count - in_page).min(buf.len() - read);
            buf[read..read + take].copy_from_slice(node.item_range(in_page, in_page + take, 1));
            read += take;
            pos += take as u64;
            if read == buf.len() || pos == st.len {
                return Ok((read, (pn, start)));
            }
            let next = node.next();
            assert!(!next.is_nil(), "chain ended before the recorded length");
            start += count as u64;
            pn = next;
        }
    }

    /// Overwrite bytes starting at `pos`, extending the string if the
    /// payload runs past the current end. `pos` must not exceed the
    /// length: the string has no holes.
    pub fn write_at(&mut self, pos: u64, bytes: &[u8]) -> Result<()> {
        let st = {
            let (_state_page, st) = self.load_state()?;
            st
        };
        if pos > st.len {
            return Err(Error::InvalidArgument(
                "write position beyond the end of the string",
            ));
        }
        let overwrite = (st.len - pos).min(bytes.len() as u64) as usize;
        if overwrite > 0 {
            let (mut pn, mut start) = self.seek(&st, pos, None)?;
            let mut pos = pos;
            let mut written = 0usize;
            while written < overwrite {
                let mut page = self.pool.map(pn)?;
                let count = NodeRef(&page[..]).count();
                let in_page = (pos - start) as usize;
                let take = (count - in_page).min(overwrite - written);
                NodeMut(&mut page[..]).write_items(in_page, 1, &bytes[written..written + take]);
                written += take;
                pos += take as u64;
                if written < overwrite {
                    let next = NodeRef(&page[..]).next();
                    assert!(!next.is_nil(), "chain ended before the recorded length");
                    start += count as u64;
                    pn = next;
                }
            }
        }
        if overwrite < bytes.len() {
            self.append(&bytes[overwrite..])?;
        }
        Ok(())
    }

    /// An iterator over the bytes, front to back.
    pub fn iter(&self) -> Result<Iter<'p, u8>> {
        self.as_list().iter()
    }

    /// The whole string as one buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let len = self.len()? as usize;
        let mut out = vec![0u8; len];
        let read = self.read_at(0, &mut out)?;
        assert_eq!(read, len, "string shorter than its recorded length");
        Ok(out)
    }

    /// Cut the string down to `new_len` bytes, returning the pages past
    /// the cut to the pool. A `new_len` at or past the current length is
    /// a no-op.
    pub fn truncate(&mut self, new_len: u64) -> Result<()> {
        let (mut state_page, mut st) = self.load_state()?;
        if new_len >= st.len {
            return Ok(());
        }
        if new_len == 0 {
            return self.clear();
        }
        // the page holding the last surviving byte, then the doomed tail
        let (pn, start) = self.seek(&st, new_len - 1, None)?;
        let mut last_page = self.pool.map(pn)?;
        let keep = (new_len - start) as usize;
        let mut tail = Vec::new();
        let mut cursor = NodeRef(&last_page[..]).next();
        while !cursor.is_nil() {
            let page = self.pool.map(cursor)?;
            tail.push(cursor);
            assert!(
                tail.len() as u64 <= st.len,
                "chain longer than the recorded byte count"
            );
            cursor = NodeRef(&page[..]).next();
        }
        // nothing below can fail
        {
            let mut node = NodeMut(&mut last_page[..]);
            let count = node.as_ref().count();
            node.truncate_items(count - keep);
            node.set_next(NIL_PAGE);
        }
        for doomed in tail {
            // UNWRAP: chain pages are valid deallocation targets.
            self.pool.deallocate(doomed).unwrap();
        }
        st.back = pn;
        st.len = new_len;
        self.state.store(&mut state_page, &st);
        Ok(())
    }

    /// Drop the contents and return every chain page to the pool.
    pub fn clear(&mut self) -> Result<()> {
        let mut list = self.as_list();
        list.clear()
    }

    /// Walk the whole chain, checking linkage and occupancy against the
    /// recorded state.
    pub fn validate(&self) -> Result<ChainStats> {
        let (_state_page, st) = self.load_state()?;
        validate_chain(self.pool, &st, 1)
    }

    /// A sequential cursor over the string with independent read and
    /// write positions, both starting at 0.
    pub fn stream(&mut self) -> Stream<'_, 'p> {
        Stream {
            string: self,
            get_pos: 0,
            put_pos: 0,
            get_hint: None,
        }
    }
}

/// A stream cursor over a [`PagedString`].
///
/// Reads consume from the get position, writes land at the put position;
/// both advance independently and cross page boundaries transparently.
/// Writes past the current end extend the string.
pub struct Stream<'a, 'p> {
    string: &'a mut PagedString<'p>,
    get_pos: u64,
    put_pos: u64,
    /// Page known to start at or before `get_pos`; saves rewalking the
    /// chain from the front on sequential reads.
    get_hint: Option<(PageNumber, u64)>,
}

impl<'a, 'p> Stream<'a, 'p> {
    pub fn get_pos(&self) -> u64 {
        self.get_pos
    }

    pub fn put_pos(&self) -> u64 {
        self.put_pos
    }

    /// Position the read cursor. `pos` may be anywhere up to the length.
    pub fn seek_get(&mut self, pos: u64) -> Result<()> {
        if pos > self.string.len()? {
            return Err(Error::InvalidArgument("seek beyond the end of the string"));
        }
        if self.get_hint.map_or(false, |(_, start)| start > pos) {
            self.get_hint = None;
        }
        self.get_pos = pos;
        Ok(())
    }

    /// Position the write cursor. `pos` may be anywhere up to the length.
    pub fn seek_put(&mut self, pos: u64) -> Result<()> {
        if pos > self.string.len()? {
            return Err(Error::InvalidArgument("seek beyond the end of the string"));
        }
        self.put_pos = pos;
        Ok(())
    }
}

fn to_io(e: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

impl io::Read for Stream<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (_state_page, st) = self.string.load_state().map_err(to_io)?;
        if self.get_pos >= st.len || buf.is_empty() {
            return Ok(0);
        }
        let remaining = (st.len - self.get_pos).min(buf.len() as u64) as usize;
        let (read, hint) = self
            .string
            .read_span(&st, self.get_pos, &mut buf[..remaining], self.get_hint)
            .map_err(to_io)?;
        self.get_pos += read as u64;
        self.get_hint = Some(hint);
        Ok(read)
    }
}

impl io::Write for Stream<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.string.write_at(self.put_pos, buf).map_err(to_io)?;
        self.put_pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
