use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::Handle;

pub struct AssetCache<T> {
    items: Vec<T>,
    by_path: HashMap<PathBuf, Handle<T>>,
}

impl<T> AssetCache<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        let index = self.items.len();
        self.items.push(item);
        Handle::new(index)
    }

    /// Inserts `item` and remembers it under `path` for later lookups.
    pub fn insert_with_path(&mut self, path: impl AsRef<Path>, item: T) -> Handle<T> {
        let handle = self.insert(item);
        self.by_path.insert(path.as_ref().to_path_buf(), handle);
        handle
    }

    pub fn handle_for_path(&self, path: impl AsRef<Path>) -> Option<Handle<T>> {
        self.by_path.get(path.as_ref()).copied()
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.items.get(handle.index())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.items.get_mut(handle.index())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for AssetCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_lookup_returns_same_handle() {
        let mut cache = AssetCache::new();
        let handle = cache.insert_with_path("textures/grass.png", 42u32);
        assert_eq!(cache.handle_for_path("textures/grass.png"), Some(handle));
        assert_eq!(cache.get(handle), Some(&42));
        assert!(cache.handle_for_path("textures/rock.png").is_none());
    }

    #[test]
    fn out_of_range_handle_is_none() {
        let cache: AssetCache<u32> = AssetCache::new();
        assert!(cache.get(Handle::new(0)).is_none());
    }
}
