use std::sync::Arc;

use parking_lot::RwLock;

use super::index::{FilesystemIndex, IndexLayout};

/// Shared, atomically swappable reference to the current index
///
/// Cloning is cheap; all clones observe the same published snapshot.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    current: Arc<RwLock<Arc<FilesystemIndex>>>,
}

impl IndexHandle {
    pub fn new(index: FilesystemIndex) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(index))),
        }
    }

    /// Handle holding an empty index for the layout
    pub fn empty(layout: &IndexLayout) -> Self {
        Self::new(FilesystemIndex::empty(layout))
    }

    /// The currently published snapshot.
    ///
    /// Callers should keep the returned `Arc` for the duration of an
    /// operation rather than calling `load` repeatedly.
    pub fn load(&self) -> Arc<FilesystemIndex> {
        self.current.read().clone()
    }

    /// Replace the published snapshot and return its generation.
    pub fn publish(&self, mut index: FilesystemIndex) -> u64 {
        let mut current = self.current.write();
        let generation = current.generation() + 1;
        index.set_generation(generation);
        *current = Arc::new(index);
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_bumps_generation() {
        let layout = IndexLayout::default();
        let handle = IndexHandle::empty(&layout);
        let before = handle.load();
        assert_eq!(before.generation(), 0);

        let clone = handle.clone();
        assert_eq!(clone.publish(FilesystemIndex::empty(&layout)), 1);
        assert_eq!(handle.publish(FilesystemIndex::empty(&layout)), 2);

        // Old readers keep their snapshot
        assert_eq!(before.generation(), 0);
        assert_eq!(handle.load().generation(), 2);
    }
}
