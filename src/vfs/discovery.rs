//! Startup scan of the export root

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{AdapterError, Result};
use crate::vfs::handle::{Handle, HandleAllocator};
use crate::vfs::table::HandleTable;

/// Register `root` as the root handle and its immediate children.
///
/// Subdirectories are not descended into; deeper entries get handles
/// the first time a lookup or listing reaches them. Returns the number
/// of children seen.
pub fn discover(root: &Path, table: &HandleTable, allocator: &HandleAllocator) -> Result<usize> {
    let meta = fs::metadata(root).map_err(|e| AdapterError::from_io(root, e))?;
    if !meta.is_dir() {
        return Err(AdapterError::NotADirectory(format!("{:?}", root)));
    }

    table.map(Handle::ROOT, root)?;

    let mut children = fs::read_dir(root)
        .map_err(|e| AdapterError::from_io(root, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| AdapterError::from_io(root, e))?;
    // Name order keeps handle assignment reproducible across runs
    children.sort();

    for child in &children {
        let handle = table.get_or_insert_with(child, || allocator.next())?;
        debug!(%handle, path = ?child, "registered root child");
    }

    info!(root = ?root, children = children.len(), "initial discovery complete");
    Ok(children.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_discover_is_shallow() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("b.txt"), b"b").unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("deep.txt"), b"deep").unwrap();

        let table = HandleTable::new();
        let alloc = HandleAllocator::new();
        let count = discover(&root, &table, &alloc).unwrap();

        assert_eq!(count, 3);
        assert_eq!(table.resolve_handle(Handle::ROOT).unwrap(), root);
        assert_eq!(table.resolve_path(&root.join("a.txt")).unwrap(), Handle::new(2));
        assert_eq!(table.resolve_path(&root.join("b.txt")).unwrap(), Handle::new(3));
        assert_eq!(table.resolve_path(&root.join("sub")).unwrap(), Handle::new(4));
        assert!(!table.contains(&root.join("sub").join("deep.txt")));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_discover_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        let table = HandleTable::new();
        let alloc = HandleAllocator::new();
        assert_eq!(discover(&root, &table, &alloc).unwrap(), 0);
        assert_eq!(table.len(), 1);
        assert_eq!(alloc.peek(), 2);
    }

    #[test]
    fn test_discover_rejects_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();

        let table = HandleTable::new();
        let alloc = HandleAllocator::new();
        assert!(matches!(
            discover(&file, &table, &alloc),
            Err(AdapterError::NotADirectory(_))
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_discover_missing_root() {
        let table = HandleTable::new();
        let alloc = HandleAllocator::new();
        let missing = PathBuf::from("/definitely/not/here/nfs-adapter");
        assert!(matches!(
            discover(&missing, &table, &alloc),
            Err(AdapterError::NotFound(_))
        ));
    }
}
