#![allow(dead_code)]

use std::path::Path;

use vmem::{Options, Pool, Record};

pub fn open_pool(dir: &Path) -> Pool {
    let mut options = Options::new();
    options.path(dir.join("store.vmem"));
    options.capacity_hint(8);
    Pool::open(&options).expect("failed to open pool")
}

pub fn temp_pool() -> (tempfile::TempDir, Pool) {
    let dir = tempfile::tempdir().expect("no tempdir");
    let pool = open_pool(dir.path());
    (dir, pool)
}

pub fn rng(seed: u64) -> rand_pcg::Lcg64Xsh32 {
    use rand::SeedableRng as _;
    let mut s = [0u8; 16];
    s[0..8].copy_from_slice(&seed.to_le_bytes());
    rand_pcg::Lcg64Xsh32::from_seed(s)
}

/// A record sized so a page holds exactly four of them, with a minimum
/// occupancy of two. Keeps rebalancing tests small.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk(pub u64);

impl Record for Chunk {
    const SIZE: usize = 1021;

    fn encode_to(&self, buf: &mut [u8]) {
        buf[..Self::SIZE].fill(0);
        buf[0..8].copy_from_slice(&self.0.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Chunk(u64::from_le_bytes(buf[0..8].try_into().unwrap()))
    }
}
