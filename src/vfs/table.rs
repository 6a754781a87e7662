//! Handle management for path <-> handle mapping
//!
//! The protocol layer addresses files by opaque handles while the
//! underlying filesystem works with paths. This module keeps the two
//! in a strict bijection.
//!
//! Both directions live in their own `DashMap`. Writers always lock the
//! path entry first and the handle entry second; readers only ever touch
//! a single shard. With that ordering a registration or removal updates
//! both maps as one step without a table-wide lock.

use std::path::{Component, Path, PathBuf};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, warn};

use crate::error::{AdapterError, Result};
use crate::vfs::handle::Handle;

/// Bidirectional handle <-> path registry
#[derive(Debug, Default)]
pub struct HandleTable {
    /// Maps path -> handle (lock order: first)
    path_to_handle: DashMap<PathBuf, Handle>,
    /// Maps handle -> path (lock order: second)
    handle_to_path: DashMap<Handle, PathBuf>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` <-> `path`.
    ///
    /// Registering a pair that is already present is a no-op. Any conflict
    /// leaves the table untouched.
    pub fn map(&self, handle: Handle, path: &Path) -> Result<()> {
        let path = normalize_path(path);

        match self.path_to_handle.entry(path.clone()) {
            Entry::Occupied(by_path) => {
                let existing = *by_path.get();
                if existing == handle {
                    return Ok(());
                }
                Err(AdapterError::DuplicatePath { path, existing })
            }
            Entry::Vacant(by_path) => match self.handle_to_path.entry(handle) {
                Entry::Occupied(by_handle) => Err(AdapterError::DuplicateHandle {
                    handle,
                    existing: by_handle.get().clone(),
                }),
                Entry::Vacant(by_handle) => {
                    let _guard = by_handle.insert(path.clone());
                    debug!(%handle, path = ?path, "mapped");
                    by_path.insert(handle);
                    Ok(())
                }
            },
        }
    }

    /// Remove the `handle` <-> `path` pair.
    ///
    /// Both directions must agree before anything is removed; a mismatch
    /// means the bijection was already broken and is reported as
    /// `Inconsistent` without touching either map.
    pub fn unmap(&self, handle: Handle, path: &Path) -> Result<()> {
        if handle.is_root() {
            return Err(AdapterError::InvalidArgument(
                "the root handle cannot be unmapped".to_string(),
            ));
        }

        let path = normalize_path(path);

        match self.path_to_handle.entry(path.clone()) {
            Entry::Occupied(by_path) => {
                let stored = *by_path.get();
                if stored != handle {
                    return Err(inconsistent(format!(
                        "path {:?} maps to {}, not {}",
                        path, stored, handle
                    )));
                }

                match self.handle_to_path.entry(handle) {
                    Entry::Occupied(by_handle) if *by_handle.get() == path => {
                        by_handle.remove();
                        by_path.remove();
                        debug!(%handle, path = ?path, "unmapped");
                        Ok(())
                    }
                    Entry::Occupied(by_handle) => Err(inconsistent(format!(
                        "handle {} maps to {:?}, but {:?} maps back to it",
                        handle,
                        by_handle.get(),
                        path
                    ))),
                    Entry::Vacant(_) => Err(inconsistent(format!(
                        "path {:?} maps to {}, which has no reverse entry",
                        path, handle
                    ))),
                }
            }
            Entry::Vacant(_) => match self.handle_to_path.get(&handle) {
                Some(stored) => Err(inconsistent(format!(
                    "handle {} maps to {:?}, not {:?}",
                    handle,
                    stored.value(),
                    path
                ))),
                None => Err(AdapterError::NotFound(format!(
                    "pair {} <-> {:?}",
                    handle, path
                ))),
            },
        }
    }

    /// Move `handle` from `old` to `new`.
    ///
    /// If the second half fails the pair stays removed; the error is returned.
    pub fn remap(&self, handle: Handle, old: &Path, new: &Path) -> Result<()> {
        self.unmap(handle, old)?;
        self.map(handle, new).map_err(|e| {
            warn!(%handle, old = ?old, new = ?new, error = %e, "remap left handle unmapped");
            e
        })
    }

    /// Get path for a handle
    pub fn resolve_handle(&self, handle: Handle) -> Result<PathBuf> {
        self.handle_to_path
            .get(&handle)
            .map(|p| p.clone())
            .ok_or_else(|| AdapterError::NotFound(format!("handle {}", handle)))
    }

    /// Get handle for a path (without creating)
    pub fn resolve_path(&self, path: &Path) -> Result<Handle> {
        let normalized = normalize_path(path);
        self.path_to_handle
            .get(&normalized)
            .map(|h| *h)
            .ok_or_else(|| AdapterError::NotFound(format!("path {:?}", normalized)))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.path_to_handle.contains_key(&normalize_path(path))
    }

    /// Return the handle for `path`, registering it with a handle from
    /// `alloc` if it is not known yet.
    ///
    /// Check and insert happen under the path's entry lock, so concurrent
    /// callers racing on the same path all get the same handle and `alloc`
    /// runs at most once for it.
    pub fn get_or_insert_with<F>(&self, path: &Path, alloc: F) -> Result<Handle>
    where
        F: FnOnce() -> Result<Handle>,
    {
        let path = normalize_path(path);

        match self.path_to_handle.entry(path.clone()) {
            Entry::Occupied(by_path) => Ok(*by_path.get()),
            Entry::Vacant(by_path) => {
                let handle = alloc()?;
                match self.handle_to_path.entry(handle) {
                    Entry::Occupied(by_handle) => Err(AdapterError::DuplicateHandle {
                        handle,
                        existing: by_handle.get().clone(),
                    }),
                    Entry::Vacant(by_handle) => {
                        let _guard = by_handle.insert(path.clone());
                        debug!(%handle, path = ?path, "discovered");
                        by_path.insert(handle);
                        Ok(handle)
                    }
                }
            }
        }
    }

    /// Get the number of registered pairs
    pub fn len(&self) -> usize {
        self.handle_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handle_to_path.is_empty()
    }

    /// Copy of all pairs, ordered by handle
    pub fn snapshot(&self) -> Vec<(Handle, PathBuf)> {
        let mut pairs: Vec<_> = self
            .handle_to_path
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        pairs.sort_by_key(|(h, _)| *h);
        pairs
    }
}

pub(crate) fn inconsistent(detail: String) -> AdapterError {
    error!(detail = %detail, "handle table invariant violated");
    AdapterError::Inconsistent(detail)
}

/// Lexically normalize a path: absolute, no `.` or `..`, no trailing separator
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::handle::HandleAllocator;
    use proptest::prelude::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn h(n: u64) -> Handle {
        Handle::new(n)
    }

    #[test]
    fn test_map_and_resolve() {
        let table = HandleTable::new();
        table.map(Handle::ROOT, Path::new("/export")).unwrap();
        table.map(h(2), Path::new("/export/a.txt")).unwrap();

        assert_eq!(table.resolve_handle(h(2)).unwrap(), PathBuf::from("/export/a.txt"));
        assert_eq!(table.resolve_path(Path::new("/export/a.txt")).unwrap(), h(2));
        assert!(table.contains(Path::new("/export")));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_map_same_pair_twice_is_noop() {
        let table = HandleTable::new();
        table.map(h(2), Path::new("/a")).unwrap();
        table.map(h(2), Path::new("/a")).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_handle_leaves_table_intact() {
        let table = HandleTable::new();
        table.map(h(2), Path::new("/a")).unwrap();

        let err = table.map(h(2), Path::new("/b")).unwrap_err();
        assert!(matches!(err, AdapterError::DuplicateHandle { handle, .. } if handle == h(2)));

        assert_eq!(table.resolve_handle(h(2)).unwrap(), PathBuf::from("/a"));
        assert_eq!(table.resolve_path(Path::new("/a")).unwrap(), h(2));
        assert!(!table.contains(Path::new("/b")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_path_leaves_table_intact() {
        let table = HandleTable::new();
        table.map(h(2), Path::new("/a")).unwrap();

        let err = table.map(h(3), Path::new("/a")).unwrap_err();
        assert!(matches!(err, AdapterError::DuplicatePath { existing, .. } if existing == h(2)));

        assert_eq!(table.resolve_path(Path::new("/a")).unwrap(), h(2));
        assert!(matches!(
            table.resolve_handle(h(3)),
            Err(AdapterError::NotFound(_))
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unmap() {
        let table = HandleTable::new();
        table.map(h(2), Path::new("/root/a.txt")).unwrap();

        table.unmap(h(2), Path::new("/root/a.txt")).unwrap();
        assert!(matches!(
            table.resolve_handle(h(2)),
            Err(AdapterError::NotFound(_))
        ));
        assert!(!table.contains(Path::new("/root/a.txt")));
        assert!(table.is_empty());
    }

    #[test]
    fn test_unmap_wrong_path_is_inconsistent() {
        let table = HandleTable::new();
        table.map(h(2), Path::new("/root/a.txt")).unwrap();

        let err = table.unmap(h(2), Path::new("/root/b.txt")).unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(table.resolve_handle(h(2)).unwrap(), PathBuf::from("/root/a.txt"));
        assert_eq!(table.resolve_path(Path::new("/root/a.txt")).unwrap(), h(2));
    }

    #[test]
    fn test_unmap_wrong_handle_is_inconsistent() {
        let table = HandleTable::new();
        table.map(h(2), Path::new("/a")).unwrap();
        table.map(h(3), Path::new("/b")).unwrap();

        let err = table.unmap(h(3), Path::new("/a")).unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_unmap_unknown_pair_is_not_found() {
        let table = HandleTable::new();
        assert!(matches!(
            table.unmap(h(7), Path::new("/nope")),
            Err(AdapterError::NotFound(_))
        ));
    }

    #[test]
    fn test_root_cannot_be_unmapped() {
        let table = HandleTable::new();
        table.map(Handle::ROOT, Path::new("/export")).unwrap();
        assert!(matches!(
            table.unmap(Handle::ROOT, Path::new("/export")),
            Err(AdapterError::InvalidArgument(_))
        ));
        assert_eq!(table.resolve_handle(Handle::ROOT).unwrap(), PathBuf::from("/export"));
    }

    #[test]
    fn test_remap() {
        let table = HandleTable::new();
        table.map(h(2), Path::new("/foo")).unwrap();
        table.remap(h(2), Path::new("/foo"), Path::new("/bar")).unwrap();

        assert!(!table.contains(Path::new("/foo")));
        assert_eq!(table.resolve_path(Path::new("/bar")).unwrap(), h(2));
        assert_eq!(table.resolve_handle(h(2)).unwrap(), PathBuf::from("/bar"));
    }

    #[test]
    fn test_remap_onto_taken_path_drops_pair() {
        let table = HandleTable::new();
        table.map(h(2), Path::new("/foo")).unwrap();
        table.map(h(3), Path::new("/bar")).unwrap();

        let err = table.remap(h(2), Path::new("/foo"), Path::new("/bar")).unwrap_err();
        assert!(matches!(err, AdapterError::DuplicatePath { .. }));

        assert!(table.resolve_handle(h(2)).is_err());
        assert!(!table.contains(Path::new("/foo")));
        assert_eq!(table.resolve_path(Path::new("/bar")).unwrap(), h(3));
    }

    #[test]
    fn test_paths_are_normalized() {
        let table = HandleTable::new();
        table.map(h(2), Path::new("/export/./dir/../a.txt")).unwrap();
        assert_eq!(table.resolve_path(Path::new("/export/a.txt/")).unwrap(), h(2));
        assert_eq!(normalize_path(Path::new("relative/x")), PathBuf::from("/relative/x"));
        assert_eq!(normalize_path(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn test_get_or_insert_allocates_once() {
        let table = HandleTable::new();
        let alloc = HandleAllocator::new();

        let first = table
            .get_or_insert_with(Path::new("/foo"), || alloc.next())
            .unwrap();
        let second = table
            .get_or_insert_with(Path::new("/foo"), || alloc.next())
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first, h(2));
        assert_eq!(alloc.peek(), 3);
    }

    #[test]
    fn test_get_or_insert_propagates_alloc_error() {
        let table = HandleTable::new();
        let alloc = HandleAllocator::with_limit(1);

        let err = table
            .get_or_insert_with(Path::new("/foo"), || alloc.next())
            .unwrap_err();
        assert!(matches!(err, AdapterError::IdentifierSpaceExhausted(1)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_discovery_converges() {
        const THREADS: usize = 16;

        let table = Arc::new(HandleTable::new());
        let alloc = Arc::new(HandleAllocator::new());
        let barrier = Arc::new(Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let table = table.clone();
                let alloc = alloc.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    table
                        .get_or_insert_with(Path::new("/shared/new.txt"), || alloc.next())
                        .unwrap()
                })
            })
            .collect();

        let handles: Vec<Handle> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert!(handles.iter().all(|&x| x == handles[0]));
        assert_eq!(table.len(), 1);
        // Losers never drew from the allocator
        assert_eq!(alloc.peek(), 3);
    }

    #[test]
    fn test_concurrent_disjoint_registrations() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 200;

        let table = Arc::new(HandleTable::new());
        let alloc = Arc::new(HandleAllocator::new());

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let table = table.clone();
                let alloc = alloc.clone();
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let path = PathBuf::from(format!("/t{}/f{}", t, i));
                        let handle = table.get_or_insert_with(&path, || alloc.next()).unwrap();
                        assert_eq!(table.resolve_handle(handle).unwrap(), path);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(table.len(), THREADS * PER_THREAD);
        for (handle, path) in table.snapshot() {
            assert_eq!(table.resolve_path(&path).unwrap(), handle);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Map(u64, usize),
        Unmap(u64, usize),
        Insert(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (2u64..10, 0usize..6).prop_map(|(h, p)| Op::Map(h, p)),
            (2u64..10, 0usize..6).prop_map(|(h, p)| Op::Unmap(h, p)),
            (0usize..6).prop_map(Op::Insert),
        ]
    }

    proptest! {
        #[test]
        fn prop_bijection_holds(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let table = HandleTable::new();
            let alloc = HandleAllocator::with_limit(1_000);
            let path = |i: usize| PathBuf::from(format!("/p{}", i));

            for op in ops {
                let before = table.snapshot();
                let result = match op {
                    Op::Map(hh, p) => table.map(Handle::new(hh + 100), &path(p)),
                    Op::Unmap(hh, p) => table.unmap(Handle::new(hh + 100), &path(p)),
                    Op::Insert(p) => table.get_or_insert_with(&path(p), || alloc.next()).map(|_| ()),
                };
                if result.is_err() {
                    prop_assert_eq!(&before, &table.snapshot());
                }

                for (handle, p) in table.snapshot() {
                    prop_assert_eq!(table.resolve_path(&p).unwrap(), handle);
                    prop_assert_eq!(table.resolve_handle(handle).unwrap(), p);
                }
                prop_assert_eq!(table.snapshot().len(), table.path_to_handle.len());
            }
        }
    }
}
