//! In-memory collaborators.
//!
//! Each simulator keeps its bookkeeping in a [`DashMap`] so it can be shared
//! across every simulated processor without a global lock, and exposes
//! counters that tests use to check that every handle is released exactly
//! once.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;

use super::{AddressSpace, AddressSpaces, DirRef, FileLayer, FileRef, KernelStack, PGSIZE};
use super::StackAllocator;
use crate::error::{KernelError, Result};

/// Pages available to [`Machine::simulated`](super::Machine::simulated).
pub const DEFAULT_PAGE_BUDGET: usize = 4096;

/// Kernel stacks available to [`Machine::simulated`](super::Machine::simulated).
pub const DEFAULT_STACK_BUDGET: usize = 1024;

fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PGSIZE)
}

// ---------------------------------------------------------------------------
// Address spaces
// ---------------------------------------------------------------------------

/// Address-space manager with a global page budget.
pub struct SimAddressSpaces {
    budget: usize,
    used: AtomicUsize,
    next_id: AtomicU64,
    /// Pages held by each live address space.
    spaces: DashMap<u64, usize>,
}

impl SimAddressSpaces {
    pub fn new(page_budget: usize) -> Self {
        Self {
            budget: page_budget,
            used: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            spaces: DashMap::new(),
        }
    }

    /// Pages currently allocated across all address spaces.
    pub fn pages_in_use(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    /// Number of address spaces not yet destroyed.
    pub fn live_spaces(&self) -> usize {
        self.spaces.len()
    }

    fn reserve(&self, pages: usize) -> Result<()> {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(pages).filter(|total| *total <= self.budget)
            })
            .map(|_| ())
            .map_err(|used| KernelError::OutOfMemory {
                reason: format!("{pages} pages requested, {used}/{} in use", self.budget),
            })
    }

    fn unreserve(&self, pages: usize) {
        self.used.fetch_sub(pages, Ordering::SeqCst);
    }

    fn unknown(space: AddressSpace) -> KernelError {
        KernelError::Internal(format!("unknown address space {}", space.raw()))
    }
}

impl AddressSpaces for SimAddressSpaces {
    fn create(&self) -> Result<AddressSpace> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.spaces.insert(id, 0);
        Ok(AddressSpace::from_raw(id))
    }

    fn load_image(&self, space: AddressSpace, image_len: usize) -> Result<usize> {
        let pages = pages_for(image_len).max(1);
        let mut entry = self
            .spaces
            .get_mut(&space.raw())
            .ok_or_else(|| Self::unknown(space))?;
        self.reserve(pages)?;
        *entry += pages;
        Ok(pages * PGSIZE)
    }

    fn duplicate(&self, space: AddressSpace, size: usize) -> Result<AddressSpace> {
        if !self.spaces.contains_key(&space.raw()) {
            return Err(Self::unknown(space));
        }
        let pages = pages_for(size);
        self.reserve(pages)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.spaces.insert(id, pages);
        Ok(AddressSpace::from_raw(id))
    }

    fn resize(&self, space: AddressSpace, old_size: usize, new_size: usize) -> Result<usize> {
        let mut entry = self
            .spaces
            .get_mut(&space.raw())
            .ok_or_else(|| Self::unknown(space))?;
        let (old_pages, new_pages) = (pages_for(old_size), pages_for(new_size));
        if new_pages > old_pages {
            self.reserve(new_pages - old_pages)?;
            *entry += new_pages - old_pages;
        } else {
            let freed = (old_pages - new_pages).min(*entry);
            self.unreserve(freed);
            *entry -= freed;
        }
        Ok(new_size)
    }

    fn destroy(&self, space: AddressSpace) {
        if let Some((_, pages)) = self.spaces.remove(&space.raw()) {
            self.unreserve(pages);
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel stacks
// ---------------------------------------------------------------------------

/// Kernel stack allocator with a fixed number of stacks.
pub struct SimStacks {
    budget: usize,
    in_use: AtomicUsize,
    next_id: AtomicU64,
}

impl SimStacks {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            in_use: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }
}

impl StackAllocator for SimStacks {
    fn alloc(&self) -> Option<KernelStack> {
        self.in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.budget).then_some(n + 1)
            })
            .ok()?;
        Some(KernelStack::from_raw(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn free(&self, _stack: KernelStack) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

const ROOT_INODE: u64 = 1;

/// Reference-counted files and directories.
pub struct SimFiles {
    next_id: AtomicU64,
    /// Open file -> (path, reference count).
    files: DashMap<u64, (String, usize)>,
    /// Directory inode -> reference count.
    dirs: DashMap<u64, usize>,
}

impl SimFiles {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            files: DashMap::new(),
            dirs: DashMap::new(),
        }
    }

    /// Files with at least one outstanding reference.
    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    /// Outstanding references to `file`, zero once fully closed.
    pub fn file_refs(&self, file: FileRef) -> usize {
        self.files.get(&file.raw()).map(|e| e.1).unwrap_or(0)
    }

    /// Outstanding references to the root directory.
    pub fn root_refs(&self) -> usize {
        self.dirs.get(&ROOT_INODE).map(|e| *e).unwrap_or(0)
    }
}

impl Default for SimFiles {
    fn default() -> Self {
        Self::new()
    }
}

impl FileLayer for SimFiles {
    fn open(&self, path: &str) -> Result<FileRef> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.files.insert(id, (path.to_string(), 1));
        Ok(FileRef::from_raw(id))
    }

    fn dup(&self, file: FileRef) -> FileRef {
        if let Some(mut entry) = self.files.get_mut(&file.raw()) {
            entry.1 += 1;
        }
        file
    }

    fn close(&self, file: FileRef) {
        self.files
            .remove_if_mut(&file.raw(), |_, entry| {
                entry.1 -= 1;
                entry.1 == 0
            });
    }

    fn root(&self) -> DirRef {
        *self.dirs.entry(ROOT_INODE).or_insert(0) += 1;
        DirRef::from_raw(ROOT_INODE)
    }

    fn idup(&self, dir: DirRef) -> DirRef {
        *self.dirs.entry(dir.raw()).or_insert(0) += 1;
        dir
    }

    fn iput(&self, dir: DirRef) {
        self.dirs.remove_if_mut(&dir.raw(), |_, refs| {
            *refs -= 1;
            *refs == 0
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_budget_is_enforced_without_partial_state() {
        let vm = SimAddressSpaces::new(2);
        let a = vm.create().unwrap();
        assert_eq!(vm.load_image(a, 100).unwrap(), PGSIZE);
        let b = vm.duplicate(a, PGSIZE).unwrap();
        let err = vm.duplicate(b, PGSIZE).unwrap_err();
        assert!(matches!(err, KernelError::OutOfMemory { .. }));
        assert_eq!(vm.live_spaces(), 2);
        assert_eq!(vm.pages_in_use(), 2);
        vm.destroy(b);
        assert_eq!(vm.pages_in_use(), 1);
    }

    #[test]
    fn resize_grows_and_shrinks() {
        let vm = SimAddressSpaces::new(8);
        let a = vm.create().unwrap();
        vm.load_image(a, 1).unwrap();
        assert_eq!(vm.resize(a, PGSIZE, 3 * PGSIZE).unwrap(), 3 * PGSIZE);
        assert_eq!(vm.pages_in_use(), 3);
        vm.resize(a, 3 * PGSIZE, PGSIZE).unwrap();
        assert_eq!(vm.pages_in_use(), 1);
        assert!(vm.resize(a, PGSIZE, 20 * PGSIZE).is_err());
        assert_eq!(vm.pages_in_use(), 1);
    }

    #[test]
    fn stack_budget() {
        let stacks = SimStacks::new(1);
        let s = stacks.alloc().unwrap();
        assert!(stacks.alloc().is_none());
        stacks.free(s);
        assert_eq!(stacks.in_use(), 0);
        assert!(stacks.alloc().is_some());
    }

    #[test]
    fn file_references_are_counted() {
        let files = SimFiles::new();
        let f = files.open("console").unwrap();
        let g = files.dup(f);
        assert_eq!(f, g);
        assert_eq!(files.file_refs(f), 2);
        files.close(f);
        assert_eq!(files.open_files(), 1);
        files.close(g);
        assert_eq!(files.open_files(), 0);

        let root = files.root();
        files.idup(root);
        assert_eq!(files.root_refs(), 2);
        files.iput(root);
        files.iput(root);
        assert_eq!(files.root_refs(), 0);
    }
}
