use std::{path::PathBuf, sync::Arc};

use crate::diag::DiagSink;

/// Options when opening a [`crate::Pool`] instance.
pub struct Options {
    /// The path of the backing file.
    pub(crate) path: PathBuf,
    /// How many pages to pre-size a fresh store for.
    pub(crate) capacity_hint: u32,
    /// The diagnostic sink, if any.
    pub(crate) diag: Option<Arc<dyn DiagSink>>,
}

impl Options {
    /// Create a new `Options` instance with the default values.
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("vmem_store"),
            capacity_hint: 64,
            diag: None,
        }
    }

    /// Set the path of the backing file.
    pub fn path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    /// Hint for how many pages the store is expected to hold. A fresh
    /// store file is pre-sized to it; the store grows past the hint on
    /// demand.
    ///
    /// Default: 64.
    pub fn capacity_hint(&mut self, pages: u32) {
        self.capacity_hint = pages;
    }

    /// Install a diagnostic sink. Without one, the pool never logs.
    pub fn diag_sink(&mut self, sink: Arc<dyn DiagSink>) {
        self.diag = Some(sink);
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}
