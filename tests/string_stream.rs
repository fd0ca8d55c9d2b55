mod common;

use std::io::{Read as _, Write as _};

use common::temp_pool;
use rand::Rng as _;
use vmem::{Error, PagedString};

// Page-crossing payload: a recognizable head and tail around enough
// filler to span several pages.
fn marked_payload(filler: usize) -> Vec<u8> {
    let mut payload = Vec::with_capacity(filler + 6);
    payload.extend_from_slice(b"abc");
    payload.extend(std::iter::repeat(0xA5u8).take(filler));
    payload.extend_from_slice(b"xyz");
    payload
}

#[test]
fn stream_round_trip_across_pages() {
    let (_dir, pool) = temp_pool();
    let mut s = PagedString::create(&pool, pool.start_ptr(0)).unwrap();
    let payload = marked_payload(10_000);
    {
        let mut stream = s.stream();
        stream.write_all(&payload).unwrap();
    }
    assert_eq!(s.len().unwrap(), payload.len() as u64);
    let stats = s.validate().unwrap();
    assert!(stats.pages > 1, "payload was meant to span pages");

    // back through the stream cursor
    let mut out = Vec::new();
    s.stream().read_to_end(&mut out).unwrap();
    assert_eq!(out, payload);

    // and through plain iteration
    let bytes: Vec<u8> = s.iter().unwrap().collect::<vmem::Result<_>>().unwrap();
    assert_eq!(bytes, payload);
}

#[test]
fn chunked_writes_equal_one_write() {
    let (_dir, pool) = temp_pool();
    let mut s = PagedString::create(&pool, pool.start_ptr(0)).unwrap();
    let payload = marked_payload(9_000);
    {
        let mut stream = s.stream();
        let mut rest: &[u8] = &payload;
        for chunk in [7usize, 333, 4086, 1, 2048].iter().cycle() {
            if rest.is_empty() {
                break;
            }
            let take = (*chunk).min(rest.len());
            stream.write_all(&rest[..take]).unwrap();
            rest = &rest[take..];
        }
    }
    assert_eq!(s.to_vec().unwrap(), payload);
    s.validate().unwrap();
}

#[test]
fn small_appends_accumulate() {
    let (_dir, pool) = temp_pool();
    let mut s = PagedString::create(&pool, pool.start_ptr(0)).unwrap();
    let mut mirror = Vec::new();
    for i in 0..300u32 {
        let piece = format!("piece-{i};");
        s.append(piece.as_bytes()).unwrap();
        mirror.extend_from_slice(piece.as_bytes());
    }
    assert_eq!(s.len().unwrap(), mirror.len() as u64);
    assert_eq!(s.to_vec().unwrap(), mirror);
    s.validate().unwrap();
}

#[test]
fn overwrite_in_place() {
    let (_dir, pool) = temp_pool();
    let mut s = PagedString::create(&pool, pool.start_ptr(0)).unwrap();
    s.append(b"hello world").unwrap();
    {
        let mut stream = s.stream();
        stream.seek_put(6).unwrap();
        stream.write_all(b"earth").unwrap();
    }
    assert_eq!(s.to_vec().unwrap(), b"hello earth");
    assert_eq!(s.len().unwrap(), 11);
}

#[test]
fn overwrite_across_a_page_boundary() {
    let (_dir, pool) = temp_pool();
    let mut s = PagedString::create(&pool, pool.start_ptr(0)).unwrap();
    let mut mirror = vec![0u8; 9_000];
    let mut rng = common::rng(42);
    rng.fill(&mut mirror[..]);
    s.append(&mirror).unwrap();

    let patch: Vec<u8> = (0..2_000).map(|i| (i % 251) as u8).collect();
    s.write_at(4_000, &patch).unwrap();
    mirror[4_000..6_000].copy_from_slice(&patch);

    assert_eq!(s.to_vec().unwrap(), mirror);
    s.validate().unwrap();
}

#[test]
fn writes_past_the_end_extend() {
    let (_dir, pool) = temp_pool();
    let mut s = PagedString::create(&pool, pool.start_ptr(0)).unwrap();
    s.append(b"head").unwrap();
    {
        let mut stream = s.stream();
        stream.seek_put(2).unwrap();
        // overwrites "ad", then extends
        stream.write_all(b"ptation").unwrap();
    }
    assert_eq!(s.to_vec().unwrap(), b"heptation");

    // a put position beyond the end leaves no hole to fill
    assert!(matches!(
        s.write_at(100, b"x"),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn interleaved_cursors() {
    let (_dir, pool) = temp_pool();
    let mut s = PagedString::create(&pool, pool.start_ptr(0)).unwrap();
    s.append(&marked_payload(5_000)).unwrap();

    let mut stream = s.stream();
    let mut head = [0u8; 3];
    stream.read_exact(&mut head).unwrap();
    assert_eq!(&head, b"abc");

    // writing does not disturb the read cursor
    stream.seek_put(3).unwrap();
    stream.write_all(&[0x5A; 100]).unwrap();
    let mut next = [0u8; 100];
    stream.read_exact(&mut next).unwrap();
    assert_eq!(next, [0x5A; 100]);

    // rewinding rereads the head
    stream.seek_get(0).unwrap();
    stream.read_exact(&mut head).unwrap();
    assert_eq!(&head, b"abc");
}

#[test]
fn string_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let payload = marked_payload(12_345);
    {
        let pool = common::open_pool(dir.path());
        let mut s = PagedString::create(&pool, pool.start_ptr(0)).unwrap();
        s.append(&payload).unwrap();
    }
    let pool = common::open_pool(dir.path());
    let s = PagedString::open(&pool, pool.start_ptr(0));
    assert_eq!(s.to_vec().unwrap(), payload);
    s.validate().unwrap();
}

#[test]
fn truncate_frees_the_tail() {
    let (_dir, pool) = temp_pool();
    let mut s = PagedString::create(&pool, pool.start_ptr(0)).unwrap();
    let payload = marked_payload(10_000);
    s.append(&payload).unwrap();
    let before = s.validate().unwrap();

    s.truncate(1_000).unwrap();
    assert_eq!(s.len().unwrap(), 1_000);
    assert_eq!(s.to_vec().unwrap(), &payload[..1_000]);
    let after = s.validate().unwrap();
    assert!(after.pages < before.pages);
    let stats = pool.stats().unwrap();
    assert_eq!(stats.free as usize, before.pages - after.pages);

    // truncating past the end changes nothing
    s.truncate(5_000).unwrap();
    assert_eq!(s.len().unwrap(), 1_000);

    s.truncate(0).unwrap();
    assert!(s.is_empty().unwrap());
    assert_eq!(s.validate().unwrap().pages, 0);
}

#[test]
fn clear_then_reuse() {
    let (_dir, pool) = temp_pool();
    let mut s = PagedString::create(&pool, pool.start_ptr(0)).unwrap();
    s.append(&marked_payload(8_000)).unwrap();
    s.clear().unwrap();
    assert!(s.is_empty().unwrap());
    let stats = pool.stats().unwrap();
    assert_eq!(stats.free, stats.total);

    s.append(b"fresh start").unwrap();
    assert_eq!(s.to_vec().unwrap(), b"fresh start");
    s.validate().unwrap();
}
