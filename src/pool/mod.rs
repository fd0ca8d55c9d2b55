//! The pool: page allocation, deallocation and mapping over a single
//! backing file.
//!
//! A pool is a file divided into fixed-size pages. Page 0 is the start
//! page: the pool header lives at its head and the rest is the
//! application's start region. Every other page is either reachable from
//! some live structure or threaded onto the free chain. The pool hands out
//! pages ([`Pool::allocate`]), reclaims them ([`Pool::deallocate`]) and
//! mediates all page access through scoped, reference-counted
//! [`PageHandle`]s.

use std::{
    collections::{hash_map::Entry, HashMap},
    ptr::NonNull,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{
    diag::{DiagSink, Severity},
    error::{Error, Result},
    io::PageBuf,
    meta::{Meta, META_SIZE, START_REGION_OFFSET},
    options::Options,
    page::PageHandle,
    ptr::{Ptr, Record},
    store::{StoreFile, GROW_STORE_BY_PAGES},
};

pub(crate) mod free_chain;

/// The number of a page within a pool's backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageNumber(pub u32);

/// The invalid page position, used as the "no page" sentinel in links.
pub const NIL_PAGE: PageNumber = PageNumber(u32::MAX);

/// The reserved start page holding the pool header and the application
/// start region.
pub const START_PAGE: PageNumber = PageNumber(0);

impl PageNumber {
    pub fn is_nil(&self) -> bool {
        self.0 == NIL_PAGE.0
    }
}

impl From<u32> for PageNumber {
    fn from(x: u32) -> Self {
        PageNumber(x)
    }
}

/// Identifies one live pool instance within the process. Far pointers are
/// stamped with it, binding their equality to the pool they were created
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u32);

impl PoolId {
    /// The id carried by null far pointers, never assigned to a pool.
    pub(crate) const NULL: PoolId = PoolId(0);
}

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Page accounting for a pool; see [`Pool::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Pages ever allocated from the store, live or free. Excludes the
    /// start page.
    pub total: u32,
    /// Pages currently on the free chain.
    pub free: u32,
}

struct Mapped {
    buf: NonNull<PageBuf>,
    refs: usize,
    dirty: bool,
}

struct PoolState {
    meta: Meta,
    /// Pages the backing file currently spans.
    capacity: u32,
    mapped: HashMap<PageNumber, Mapped>,
}

pub(crate) struct PoolShared {
    store: StoreFile,
    id: PoolId,
    diag: Option<Arc<dyn DiagSink>>,
    state: Mutex<PoolState>,
}

// SAFETY: the raw buffers in the mapping table are owned by the table and
// only dereferenced through live `PageHandle`s; table bookkeeping is
// serialized by the mutex.
unsafe impl Send for PoolShared {}
unsafe impl Sync for PoolShared {}

impl PoolShared {
    pub(crate) fn pool_id(&self) -> PoolId {
        self.id
    }

    pub(crate) fn diag(&self, severity: Severity, tag: &str, message: &str) {
        if let Some(sink) = &self.diag {
            sink.log("vmem", "pool", severity, tag, message);
        }
    }

    fn map_page(shared: &Arc<PoolShared>, pn: PageNumber, zeroed: bool) -> Result<PageHandle> {
        if pn.is_nil() {
            return Err(Error::InvalidArgument("cannot map the nil page"));
        }
        let mut state = shared.state.lock();
        if pn != START_PAGE && pn.0 >= state.meta.bump.0 {
            return Err(Error::InvalidArgument(
                "page position beyond the allocated range",
            ));
        }
        let buf = match state.mapped.entry(pn) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.refs += 1;
                if zeroed {
                    // SAFETY: the buffer is alive while its entry is; byte
                    // access is governed by the single-writer contract.
                    unsafe { (*entry.buf.as_ptr()).0.fill(0) };
                    entry.dirty = true;
                }
                entry.buf
            }
            Entry::Vacant(vacant) => {
                let mut buf = PageBuf::zeroed();
                if !zeroed {
                    shared.store.read_page(pn, &mut buf)?;
                }
                // UNWRAP: `Box::into_raw` never returns null.
                let buf = NonNull::new(Box::into_raw(buf)).unwrap();
                vacant.insert(Mapped {
                    buf,
                    refs: 1,
                    dirty: zeroed,
                });
                buf
            }
        };
        Ok(PageHandle::new(shared.clone(), pn, buf))
    }

    pub(crate) fn mark_dirty(&self, pn: PageNumber) {
        let mut state = self.state.lock();
        if let Some(entry) = state.mapped.get_mut(&pn) {
            entry.dirty = true;
        }
    }

    pub(crate) fn unmap(&self, pn: PageNumber) {
        let mut state = self.state.lock();
        let entry = state
            .mapped
            .get_mut(&pn)
            .expect("unmap of a page that is not mapped");
        entry.refs -= 1;
        if entry.refs > 0 {
            return;
        }
        // UNWRAP: looked up just above.
        let entry = state.mapped.remove(&pn).unwrap();
        if entry.dirty {
            // Release paths never fail outward: a failed write-back is
            // reported to the sink and swallowed.
            // SAFETY: the buffer is owned by the removed entry.
            if let Err(e) = self.store.write_page(pn, unsafe { entry.buf.as_ref() }) {
                self.diag(
                    Severity::Error,
                    "flush",
                    &format!("failed to write back page {}: {e}", pn.0),
                );
            }
        }
        // SAFETY: refs hit zero, so no handle refers to this buffer anymore.
        unsafe { drop(Box::from_raw(entry.buf.as_ptr())) };
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (_, entry) in state.mapped.drain() {
            // Every handle keeps the shared state alive, so refs are zero
            // here; these are write-back cache leftovers.
            // SAFETY: nothing else refers to the buffer.
            unsafe { drop(Box::from_raw(entry.buf.as_ptr())) };
        }
    }
}

/// The page allocator and owner of one backing file.
///
/// One pool owns one file; the file is exclusively locked for as long as
/// the pool is alive. Dropping the pool flushes all dirty state back to
/// the file. The pool provides no internal synchronization of page
/// contents: callers sharing it across threads must serialize mutating
/// operations externally.
pub struct Pool {
    shared: Arc<PoolShared>,
    fresh: bool,
    /// The start page stays mapped for the pool's whole life; the header
    /// is encoded straight into its buffer.
    _start: PageHandle,
}

impl Pool {
    /// Open or create the pool over the file at `options.path`.
    ///
    /// Creation lays out the header and an all-zero start region. Reopening
    /// validates the header (magic, version, page size) and otherwise
    /// trusts the file contents.
    pub fn open(options: &Options) -> Result<Pool> {
        let (store, fresh) = StoreFile::open(&options.path)?;
        let id = PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed));

        let (meta, capacity) = if fresh {
            let pages = options
                .capacity_hint
                .max(1)
                .next_multiple_of(GROW_STORE_BY_PAGES);
            store.grow_to(pages)?;
            let meta = Meta {
                free_head: NIL_PAGE,
                bump: PageNumber(1),
            };
            let mut page = PageBuf::zeroed();
            meta.encode_to(&mut page[..META_SIZE]);
            store.write_page(START_PAGE, &page)?;
            store.sync()?;
            (meta, pages)
        } else {
            let capacity = store.len_pages()?;
            if capacity == 0 {
                return Err(Error::Corrupt("file is smaller than one page"));
            }
            let mut page = PageBuf::zeroed();
            store.read_page(START_PAGE, &mut page)?;
            let meta = Meta::decode(&page[..META_SIZE])?;
            if meta.bump.0 > capacity {
                return Err(Error::Corrupt("bump beyond the end of the file"));
            }
            (meta, capacity)
        };

        let shared = Arc::new(PoolShared {
            store,
            id,
            diag: options.diag.clone(),
            state: Mutex::new(PoolState {
                meta,
                capacity,
                mapped: HashMap::new(),
            }),
        });
        shared.diag(
            Severity::Info,
            "open",
            &format!(
                "{} store at {} ({capacity} pages)",
                if fresh { "created" } else { "opened" },
                options.path.display(),
            ),
        );
        let start = PoolShared::map_page(&shared, START_PAGE, false)?;
        Ok(Pool {
            shared,
            fresh,
            _start: start,
        })
    }

    /// The id stamped onto far pointers created against this pool.
    pub fn id(&self) -> PoolId {
        self.shared.id
    }

    /// Whether this open created the backing file.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// A far pointer into the start region, `offset` bytes past its
    /// beginning. Root records of top-level containers live here.
    pub fn start_ptr<T: Record>(&self, offset: usize) -> Ptr<T> {
        Ptr::from_raw_parts(self.shared.id, START_PAGE, START_REGION_OFFSET + offset)
    }

    /// Map the page at `pn`, returning a scoped handle onto its bytes.
    ///
    /// Mapping an already-mapped page returns another handle onto the same
    /// buffer; writes through any handle are immediately visible through
    /// the others.
    pub fn map(&self, pn: PageNumber) -> Result<PageHandle> {
        PoolShared::map_page(&self.shared, pn, false)
    }

    /// Map the page at `pn` without reading it, with its buffer zeroed.
    /// For pages about to be fully overwritten, typically fresh
    /// allocations.
    pub fn map_zeroed(&self, pn: PageNumber) -> Result<PageHandle> {
        PoolShared::map_page(&self.shared, pn, true)
    }

    /// Allocate one page, recycling the most recently freed page if the
    /// free chain is non-empty. Never returns the start page.
    ///
    /// The returned page's contents are unspecified; map it with
    /// [`Pool::map_zeroed`] before use.
    pub fn allocate(&self) -> Result<PageNumber> {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        if !state.meta.free_head.is_nil() {
            let pn = state.meta.free_head;
            let next = match state.mapped.get(&pn) {
                // SAFETY: resident buffers stay alive while their entry
                // does; mutating access is externally serialized.
                Some(entry) => free_chain::next_free(unsafe { &entry.buf.as_ref().0 }),
                None => {
                    let mut buf = PageBuf::zeroed();
                    shared.store.read_page(pn, &mut buf)?;
                    free_chain::next_free(&buf.0)
                }
            };
            assert!(
                next.is_nil() || (next.0 != 0 && next.0 < state.meta.bump.0),
                "free chain link out of range: {} -> {}",
                pn.0,
                next.0,
            );
            state.meta.free_head = next;
            write_meta(&mut state);
            return Ok(pn);
        }

        let pn = state.meta.bump;
        if pn.is_nil() {
            return Err(Error::StorageFull(std::io::Error::new(
                std::io::ErrorKind::Other,
                "page address space exhausted",
            )));
        }
        if pn.0 >= state.capacity {
            let target = (pn.0 + 1).next_multiple_of(GROW_STORE_BY_PAGES);
            shared.store.grow_to(target).map_err(Error::StorageFull)?;
            state.capacity = target;
            shared.diag(
                Severity::Debug,
                "grow",
                &format!("store grown to {target} pages"),
            );
        }
        state.meta.bump = PageNumber(pn.0 + 1);
        write_meta(&mut state);
        Ok(pn)
    }

    /// Return a page to the free chain. The page's contents are clobbered
    /// by the chain link.
    ///
    /// Rejects the start page, positions never allocated, and the current
    /// chain head. Freeing a page still referenced by live structures, or
    /// already deeper in the chain, is a caller error this method cannot
    /// detect.
    pub fn deallocate(&self, pn: PageNumber) -> Result<()> {
        let mut state = self.shared.state.lock();
        if pn.is_nil() || pn == START_PAGE {
            return Err(Error::InvalidArgument(
                "cannot deallocate the start page or the nil page",
            ));
        }
        if pn.0 >= state.meta.bump.0 {
            return Err(Error::InvalidArgument("page position was never allocated"));
        }
        if pn == state.meta.free_head {
            return Err(Error::InvalidArgument("page is already free"));
        }
        let old_head = state.meta.free_head;
        match state.mapped.entry(pn) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                // SAFETY: as in `allocate`.
                free_chain::set_next_free(unsafe { &mut (*entry.buf.as_ptr()).0 }, old_head);
                entry.dirty = true;
            }
            Entry::Vacant(vacant) => {
                let mut buf = PageBuf::zeroed();
                free_chain::set_next_free(&mut buf.0, old_head);
                // UNWRAP: `Box::into_raw` never returns null.
                let buf = NonNull::new(Box::into_raw(buf)).unwrap();
                vacant.insert(Mapped {
                    buf,
                    refs: 0,
                    dirty: true,
                });
            }
        }
        state.meta.free_head = pn;
        write_meta(&mut state);
        Ok(())
    }

    /// Flush every dirty mapped page and the pool header, then fsync the
    /// backing file.
    pub fn sync(&self) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        write_meta(&mut state);
        let mut evicted = Vec::new();
        for (&pn, entry) in state.mapped.iter_mut() {
            if entry.dirty {
                // SAFETY: the buffer is alive while its entry is.
                shared.store.write_page(pn, unsafe { entry.buf.as_ref() })?;
                entry.dirty = false;
            }
            if entry.refs == 0 {
                evicted.push(pn);
            }
        }
        for pn in evicted {
            // UNWRAP: collected from the table just above.
            let entry = state.mapped.remove(&pn).unwrap();
            // SAFETY: refs is zero, no handle refers to this buffer.
            unsafe { drop(Box::from_raw(entry.buf.as_ptr())) };
        }
        shared.store.sync()?;
        Ok(())
    }

    /// Walk the free chain and report page accounting.
    pub fn stats(&self) -> Result<PoolStats> {
        let shared = &self.shared;
        let state = shared.state.lock();
        let total = state.meta.bump.0 - 1;
        let mut free = 0u32;
        let mut pn = state.meta.free_head;
        while !pn.is_nil() {
            assert!(
                free < total,
                "free chain longer than the allocated page count"
            );
            free += 1;
            pn = match state.mapped.get(&pn) {
                // SAFETY: as in `allocate`.
                Some(entry) => free_chain::next_free(unsafe { &entry.buf.as_ref().0 }),
                None => {
                    let mut buf = PageBuf::zeroed();
                    shared.store.read_page(pn, &mut buf)?;
                    free_chain::next_free(&buf.0)
                }
            };
        }
        Ok(PoolStats { total, free })
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            self.shared
                .diag(Severity::Error, "close", &format!("final sync failed: {e}"));
        }
    }
}

// Encode the in-memory header into the resident start page buffer.
fn write_meta(state: &mut PoolState) {
    let meta = state.meta.clone();
    let entry = state
        .mapped
        .get_mut(&START_PAGE)
        .expect("the start page is mapped for the pool's lifetime");
    // SAFETY: the start page buffer is alive for the pool's lifetime and
    // bytes below the start region are owned by the pool.
    meta.encode_to(unsafe { &mut (&mut (*entry.buf.as_ptr()).0)[..META_SIZE] });
    entry.dirty = true;
}

#[cfg(test)]
mod tests {
    use super::{PageNumber, Pool, START_PAGE};
    use crate::{error::Error, options::Options};

    fn open(dir: &std::path::Path) -> Pool {
        let mut options = Options::new();
        options.path(dir.join("store.vmem"));
        options.capacity_hint(8);
        Pool::open(&options).unwrap()
    }

    #[test]
    fn map_rejects_nil_and_unallocated() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(dir.path());
        assert!(matches!(
            pool.map(super::NIL_PAGE),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            pool.map(PageNumber(1)),
            Err(Error::InvalidArgument(_))
        ));
        let pn = pool.allocate().unwrap();
        assert!(pool.map(pn).is_ok());
    }

    #[test]
    fn handles_share_one_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(dir.path());
        let pn = pool.allocate().unwrap();
        let mut a = pool.map_zeroed(pn).unwrap();
        let b = pool.map(pn).unwrap();
        a[100] = 0xAB;
        assert_eq!(b[100], 0xAB);
    }

    #[test]
    fn start_page_is_never_allocated() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(dir.path());
        for _ in 0..100 {
            assert_ne!(pool.allocate().unwrap(), START_PAGE);
        }
    }

    #[test]
    fn dirty_pages_flush_on_last_unmap() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(dir.path());
        let pn = pool.allocate().unwrap();
        {
            let mut page = pool.map_zeroed(pn).unwrap();
            page[0..4].copy_from_slice(b"data");
        }
        // remapping reads the flushed bytes back from the file
        let page = pool.map(pn).unwrap();
        assert_eq!(&page[0..4], b"data");
    }
}
