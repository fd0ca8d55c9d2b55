use std::{
    io::{Read as _, Write as _},
    sync::Arc,
};

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use vmem::{List, ListState, Options, PagedString, Pool, Record as _, TracingSink};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "vmem_demo.store".to_string());

    let mut options = Options::new();
    options.path(&path);
    options.diag_sink(Arc::new(TracingSink));
    let pool = Pool::open(&options)?;
    println!(
        "{} store at {path}",
        if pool.is_fresh() { "created" } else { "reopened" }
    );

    // two roots side by side in the start region
    let numbers_root = pool.start_ptr::<ListState>(0);
    let text_root = pool.start_ptr::<ListState>(ListState::SIZE);

    let mut numbers = if pool.is_fresh() {
        List::<u64>::create(&pool, numbers_root)?
    } else {
        List::<u64>::open(&pool, numbers_root)
    };
    let base = numbers.len()?;
    for i in 0..1000u64 {
        numbers.push_back(&(base + i))?;
    }
    let total: u64 = numbers.iter()?.sum::<vmem::Result<u64>>()?;
    let stats = numbers.validate()?;
    println!(
        "list: {} items over {} pages, sum {total}",
        stats.items, stats.pages
    );

    let mut text = if pool.is_fresh() {
        PagedString::create(&pool, text_root)?
    } else {
        PagedString::open(&pool, text_root)
    };
    let end = text.len()?;
    {
        let mut stream = text.stream();
        stream.seek_put(end)?;
        writeln!(stream, "run with {} items in the list", base + 1000)?;
    }
    let mut contents = String::new();
    text.stream().read_to_string(&mut contents)?;
    print!("{contents}");

    let pool_stats = pool.stats()?;
    println!(
        "pool: {} pages allocated, {} free",
        pool_stats.total, pool_stats.free
    );
    pool.sync()?;
    Ok(())
}
