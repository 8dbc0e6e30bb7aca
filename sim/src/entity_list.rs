use crate::Handle;
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    mem,
    ops::{Deref, DerefMut},
};

/// Small ordered collection of handles. Membership tests are linear, which
/// is fine for chunk buckets and visibility sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityList {
    handles: Vec<Handle>,
}

impl EntityList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn add(&mut self, handle: Handle) {
        self.handles.push(handle);
    }

    /// Adds `handle` unless it is already present.
    pub fn insert(&mut self, handle: Handle) -> bool {
        if self.contains(handle) {
            return false;
        }
        self.handles.push(handle);
        true
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.handles.contains(&handle)
    }

    /// Removes `handle`, moving the last element into its slot.
    pub fn remove(&mut self, handle: Handle) -> bool {
        match self.handles.iter().position(|&h| h == handle) {
            Some(index) => {
                self.handles.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.handles.clear();
    }

    pub fn get(&self, index: usize) -> Option<Handle> {
        self.handles.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Handle> + '_ {
        self.handles.iter().copied()
    }

    pub fn as_slice(&self) -> &[Handle] {
        &self.handles
    }

    pub fn retain<F: FnMut(Handle) -> bool>(&mut self, mut f: F) {
        self.handles.retain(|&h| f(h));
    }

    pub fn extend_from(&mut self, other: &EntityList) {
        self.handles.extend_from_slice(&other.handles);
    }
}

impl FromIterator<Handle> for EntityList {
    fn from_iter<I: IntoIterator<Item = Handle>>(iter: I) -> Self {
        Self {
            handles: iter.into_iter().collect(),
        }
    }
}

/// Scratch lists for range queries. Lists are handed out behind a guard
/// that clears and returns them when dropped.
#[derive(Debug, Default)]
pub struct EntityListPool {
    free: RefCell<Vec<EntityList>>,
}

impl EntityListPool {
    pub fn get(&self) -> PooledList<'_> {
        let list = self.free.borrow_mut().pop().unwrap_or_default();
        PooledList { list, pool: self }
    }

    pub fn available(&self) -> usize {
        self.free.borrow().len()
    }
}

pub struct PooledList<'a> {
    list: EntityList,
    pool: &'a EntityListPool,
}

impl<'a> Deref for PooledList<'a> {
    type Target = EntityList;
    fn deref(&self) -> &Self::Target {
        &self.list
    }
}

impl<'a> DerefMut for PooledList<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.list
    }
}

impl<'a> Drop for PooledList<'a> {
    fn drop(&mut self) {
        let mut list = mem::take(&mut self.list);
        list.clear();
        self.pool.free.borrow_mut().push(list);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::{EntityKind, Registry};

    #[test]
    fn pooled_lists_return_on_early_exit() {
        let pool = EntityListPool::default();
        let mut registry = Registry::default();
        let handle = registry.alloc(EntityKind::Effect);
        let find = |stop_early: bool| -> bool {
            let mut list = pool.get();
            list.add(handle);
            if stop_early {
                return true;
            }
            list.contains(handle)
        };
        assert!(find(true));
        assert_eq!(pool.available(), 1);
        assert!(find(false));
        assert_eq!(pool.available(), 1);
        assert!(pool.get().is_empty());
    }

    #[test]
    fn remove_swaps_last_into_place() {
        let mut registry = Registry::default();
        let handles: Vec<_> = (0..3).map(|_| registry.alloc(EntityKind::Effect)).collect();
        let mut list: EntityList = handles.iter().copied().collect();
        assert!(list.remove(handles[0]));
        assert_eq!(list.as_slice(), &[handles[2], handles[1]]);
        assert!(!list.remove(handles[0]));
        assert!(!list.insert(handles[1]));
    }
}
