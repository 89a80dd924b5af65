//! Loader handles
//!
//! A loader is the host's view of where code units come from. Loaders form
//! a parent chain; a type is defined by the first loader, searching from the
//! root of the chain downwards, that can produce its unit.

use rustc_hash::FxHashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identity of a loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(pub u64);

impl fmt::Display for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loader#{}", self.0)
    }
}

/// Source of code units for one loader
pub trait Loader: Send + Sync {
    /// Loader identity
    fn id(&self) -> LoaderId;

    /// Parent loader, consulted first
    fn parent(&self) -> Option<Arc<dyn Loader>>;

    /// Raw bytes of the named unit, if this loader defines it
    fn find_unit(&self, name: &str) -> Option<Vec<u8>>;
}

/// Walk the loader chain from the root down to `loader`
pub fn delegation_chain(loader: &Arc<dyn Loader>) -> Vec<Arc<dyn Loader>> {
    let mut chain = vec![loader.clone()];
    let mut current = loader.parent();
    while let Some(parent) = current {
        // A loader that lists itself as an ancestor would loop forever
        if chain.iter().any(|l| l.id() == parent.id()) {
            break;
        }
        current = parent.parent();
        chain.push(parent);
    }
    chain.reverse();
    chain
}

/// Find a unit through the loader chain, parent first
///
/// Returns the defining loader along with the bytes.
pub fn find_through_chain(loader: &Arc<dyn Loader>, name: &str) -> Option<(Arc<dyn Loader>, Vec<u8>)> {
    delegation_chain(loader)
        .into_iter()
        .find_map(|l| l.find_unit(name).map(|bytes| (l, bytes)))
}

/// In-memory loader
pub struct MemoryLoader {
    id: LoaderId,
    parent: Option<Arc<dyn Loader>>,
    units: FxHashMap<String, Vec<u8>>,
}

impl MemoryLoader {
    /// Create an empty loader
    pub fn new(id: u64, parent: Option<Arc<dyn Loader>>) -> Self {
        Self {
            id: LoaderId(id),
            parent,
            units: FxHashMap::default(),
        }
    }

    /// Add a unit under its name
    pub fn with_unit(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.units.insert(name.into(), bytes);
        self
    }

    /// Add a unit under its name
    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.units.insert(name.into(), bytes);
    }

    /// Wrap in a shared handle
    pub fn into_handle(self) -> Arc<dyn Loader> {
        Arc::new(self)
    }
}

impl Loader for MemoryLoader {
    fn id(&self) -> LoaderId {
        self.id
    }

    fn parent(&self) -> Option<Arc<dyn Loader>> {
        self.parent.clone()
    }

    fn find_unit(&self, name: &str) -> Option<Vec<u8>> {
        self.units.get(name).cloned()
    }
}

/// Loader reading `<root>/<name>.weft` files
pub struct DirLoader {
    id: LoaderId,
    parent: Option<Arc<dyn Loader>>,
    root: PathBuf,
}

/// File extension of encoded units
pub const UNIT_EXTENSION: &str = "weft";

impl DirLoader {
    /// Create a loader over a directory
    pub fn new(id: u64, root: impl AsRef<Path>, parent: Option<Arc<dyn Loader>>) -> Self {
        Self {
            id: LoaderId(id),
            parent,
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Path a unit would be read from
    pub fn unit_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, UNIT_EXTENSION))
    }
}

impl Loader for DirLoader {
    fn id(&self) -> LoaderId {
        self.id
    }

    fn parent(&self) -> Option<Arc<dyn Loader>> {
        self.parent.clone()
    }

    fn find_unit(&self, name: &str) -> Option<Vec<u8>> {
        // Reject names that would escape the root
        if name.split('/').any(|part| part.is_empty() || part == "..") {
            return None;
        }
        std::fs::read(self.unit_path(name)).ok()
    }
}
