//! The pool header, persisted at the head of the start page.

use crate::{
    error::{Error, Result},
    io::PAGE_SIZE,
    pool::PageNumber,
};

/// Magic bytes identifying a vmem store file.
pub(crate) const MAGIC: [u8; 4] = *b"vmem";

/// Current on-disk format version.
pub(crate) const VERSION: u32 = 1;

/// Encoded size of the header.
pub(crate) const META_SIZE: usize = 24;

/// Byte offset within the start page where the application start region
/// begins. Everything below this offset belongs to the pool.
pub const START_REGION_OFFSET: usize = 64;

/// This data structure describes the persistent state of the pool.
#[derive(Debug, Clone)]
pub(crate) struct Meta {
    /// The head of the free chain. [`crate::NIL_PAGE`] means the chain is
    /// empty.
    pub free_head: PageNumber,
    /// The next page available for bump allocation. Since the start page
    /// is reserved, this is always at least 1.
    pub bump: PageNumber,
}

impl Meta {
    pub fn encode_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), META_SIZE);
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&(PAGE_SIZE as u32).to_le_bytes());
        buf[12..16].copy_from_slice(&self.free_head.0.to_le_bytes());
        buf[16..20].copy_from_slice(&self.bump.0.to_le_bytes());
        buf[20..24].copy_from_slice(&0u32.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        assert_eq!(buf.len(), META_SIZE);
        if buf[0..4] != MAGIC {
            return Err(Error::Corrupt("bad magic"));
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(Error::Corrupt("unsupported format version"));
        }
        let page_size = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if page_size as usize != PAGE_SIZE {
            return Err(Error::Corrupt("page size mismatch"));
        }
        let free_head = PageNumber(u32::from_le_bytes(buf[12..16].try_into().unwrap()));
        let bump = PageNumber(u32::from_le_bytes(buf[16..20].try_into().unwrap()));
        if bump.0 == 0 {
            return Err(Error::Corrupt("bump below the reserved start page"));
        }
        Ok(Meta { free_head, bump })
    }
}

#[cfg(test)]
mod tests {
    use super::{Meta, META_SIZE};
    use crate::pool::{PageNumber, NIL_PAGE};

    #[test]
    fn round_trip() {
        let meta = Meta {
            free_head: PageNumber(17),
            bump: PageNumber(42),
        };
        let mut buf = [0u8; META_SIZE];
        meta.encode_to(&mut buf);
        let decoded = Meta::decode(&buf).unwrap();
        assert_eq!(decoded.free_head, meta.free_head);
        assert_eq!(decoded.bump, meta.bump);
    }

    #[test]
    fn rejects_foreign_file() {
        // an all-zero page 0 is not a valid header
        let buf = [0u8; META_SIZE];
        assert!(Meta::decode(&buf).is_err());
    }

    #[test]
    fn rejects_version_from_the_future() {
        let meta = Meta {
            free_head: NIL_PAGE,
            bump: PageNumber(1),
        };
        let mut buf = [0u8; META_SIZE];
        meta.encode_to(&mut buf);
        buf[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(Meta::decode(&buf).is_err());
    }
}
