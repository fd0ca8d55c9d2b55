//! The page store: one file holding a flat sequence of fixed-size pages.

use std::{
    fs::{File, OpenOptions},
    path::Path,
};

use fs2::FileExt as _;

use crate::{
    error::{Error, Result},
    io::{self, PageBuf, PAGE_SIZE},
    pool::PageNumber,
};

/// The file is grown in chunks of this many pages. Newly extended regions
/// read back as zeroes.
pub(crate) const GROW_STORE_BY_PAGES: u32 = 64;

pub(crate) struct StoreFile {
    file: File,
}

impl StoreFile {
    /// Open or create the backing file, taking an exclusive advisory lock
    /// on it. The second return value is true if the file was empty.
    pub fn open(path: &Path) -> Result<(StoreFile, bool)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(Error::Io(fs2::lock_contended_error()));
        }
        let fresh = file.metadata()?.len() == 0;
        Ok((StoreFile { file }, fresh))
    }

    /// The number of whole pages the file currently spans.
    pub fn len_pages(&self) -> Result<u32> {
        Ok((self.file.metadata()?.len() / PAGE_SIZE as u64) as u32)
    }

    pub fn read_page(&self, pn: PageNumber, buf: &mut PageBuf) -> std::io::Result<()> {
        io::read_page(&self.file, pn.0 as u64, buf)
    }

    pub fn write_page(&self, pn: PageNumber, buf: &PageBuf) -> std::io::Result<()> {
        io::write_page(&self.file, pn.0 as u64, buf)
    }

    /// Extend the file to span `pages` pages. The new region reads as zeroes.
    pub fn grow_to(&self, pages: u32) -> std::io::Result<()> {
        self.file.set_len(pages as u64 * PAGE_SIZE as u64)
    }

    pub fn sync(&self) -> std::io::Result<()> {
        self.file.sync_all()
    }
}

impl Drop for StoreFile {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            eprintln!("failed to unlock store file: {e}");
        }
    }
}
