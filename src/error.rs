/// Errors surfaced by the vmem engine.
///
/// Violations of on-disk structural invariants are not represented here:
/// they indicate an already-inconsistent store, and further mutation would
/// make it worse, so they abort via assertions instead of returning control
/// to the mutating caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing file could not be opened, read, written or locked.
    #[error("store I/O failed")]
    Io(#[from] std::io::Error),
    /// The backing file could not be extended by another page.
    #[error("store cannot grow further")]
    StorageFull(#[source] std::io::Error),
    /// A caller-supplied position, index or offset is not usable.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The file is not a store this version can open.
    #[error("not a usable store: {0}")]
    Corrupt(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
