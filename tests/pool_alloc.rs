mod common;

use common::{open_pool, temp_pool};
use vmem::{Error, Options, PageNumber, Pool, START_PAGE};

#[test]
fn bump_allocation_is_sequential() {
    let (_dir, pool) = temp_pool();
    for expected in 1..=10u32 {
        assert_eq!(pool.allocate().unwrap(), PageNumber(expected));
    }
}

#[test]
fn freed_pages_are_recycled_lifo() {
    let (_dir, pool) = temp_pool();
    let pages: Vec<_> = (0..10).map(|_| pool.allocate().unwrap()).collect();
    for &pn in &pages[..5] {
        pool.deallocate(pn).unwrap();
    }
    // the most recently freed page comes back first
    for &pn in pages[..5].iter().rev() {
        assert_eq!(pool.allocate().unwrap(), pn);
    }
    // the chain is empty again; the next allocation extends the store
    assert_eq!(pool.allocate().unwrap(), PageNumber(11));
}

#[test]
fn conservation_after_churn() {
    let (_dir, pool) = temp_pool();
    let pages: Vec<_> = (0..10).map(|_| pool.allocate().unwrap()).collect();
    for &pn in &pages[..5] {
        pool.deallocate(pn).unwrap();
    }
    let stats = pool.stats().unwrap();
    assert_eq!(stats.total, 10);
    assert_eq!(stats.free, 5);

    // reallocating drains the chain without extending the file
    for _ in 0..5 {
        pool.allocate().unwrap();
    }
    let stats = pool.stats().unwrap();
    assert_eq!(stats.total, 10);
    assert_eq!(stats.free, 0);
}

#[test]
fn deallocate_rejects_bad_positions() {
    let (_dir, pool) = temp_pool();
    assert!(matches!(
        pool.deallocate(START_PAGE),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        pool.deallocate(PageNumber(99)),
        Err(Error::InvalidArgument(_))
    ));

    let pn = pool.allocate().unwrap();
    pool.deallocate(pn).unwrap();
    // freeing the chain head again is detected
    assert!(matches!(
        pool.deallocate(pn),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn allocator_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b, c) = {
        let pool = open_pool(dir.path());
        assert!(pool.is_fresh());
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        pool.deallocate(a).unwrap();
        pool.deallocate(b).unwrap();
        (a, b, c)
    };
    let pool = open_pool(dir.path());
    assert!(!pool.is_fresh());
    let stats = pool.stats().unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.free, 2);
    assert_eq!(pool.allocate().unwrap(), b);
    assert_eq!(pool.allocate().unwrap(), a);
    // c was never freed; the next allocation extends past it
    assert_eq!(pool.allocate().unwrap(), PageNumber(c.0 + 1));
}

#[test]
fn page_contents_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let pn;
    {
        let pool = open_pool(dir.path());
        pn = pool.allocate().unwrap();
        let mut page = pool.map_zeroed(pn).unwrap();
        page[10..17].copy_from_slice(b"durable");

        // handles to the same page observe each other's writes
        let other = pool.map(pn).unwrap();
        assert_eq!(&other[10..17], b"durable");
    }
    let pool = open_pool(dir.path());
    let page = pool.map(pn).unwrap();
    assert_eq!(&page[10..17], b"durable");
}

#[test]
fn one_pool_per_file() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_pool(dir.path());

    let mut options = Options::new();
    options.path(dir.path().join("store.vmem"));
    assert!(Pool::open(&options).is_err());

    drop(pool);
    assert!(Pool::open(&options).is_ok());
}

#[test]
fn foreign_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.vmem");
    std::fs::write(&path, vec![0xFFu8; vmem::PAGE_SIZE]).unwrap();

    let mut options = Options::new();
    options.path(&path);
    assert!(matches!(Pool::open(&options), Err(Error::Corrupt(_))));
}
