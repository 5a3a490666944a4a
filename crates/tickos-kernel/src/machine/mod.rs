//! Contracts with the subsystems the process core only consumes.
//!
//! The scheduler and lifecycle code never touch page tables, the kernel page
//! allocator or the filesystem directly.  They go through the three narrow
//! traits below, holding nothing but opaque handles.  Failures are plain
//! resource-exhaustion signals; an implementation must never leave partial
//! state behind when it returns an error.
//!
//! [`sim`] provides in-memory implementations with budgets so exhaustion
//! paths can be exercised.

pub mod sim;

use std::sync::Arc;

use crate::error::Result;

/// Size of one page of user memory.
pub const PGSIZE: usize = 4096;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            /// Wrap an implementation-defined identifier.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The implementation-defined identifier.
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

opaque_handle!(
    /// A user address space owned by exactly one process record.
    AddressSpace
);
opaque_handle!(
    /// A kernel stack owned by exactly one process record.
    KernelStack
);
opaque_handle!(
    /// One reference to an open file.
    FileRef
);
opaque_handle!(
    /// One reference to a directory inode.
    DirRef
);

/// Address-space manager.
pub trait AddressSpaces: Send + Sync {
    /// Create an empty address space holding only kernel mappings.
    fn create(&self) -> Result<AddressSpace>;

    /// Load the embedded initial program; returns the resulting user size.
    fn load_image(&self, space: AddressSpace, image_len: usize) -> Result<usize>;

    /// Copy the first `size` bytes of `space` into a fresh address space.
    fn duplicate(&self, space: AddressSpace, size: usize) -> Result<AddressSpace>;

    /// Grow or shrink user memory from `old_size` to `new_size`; returns the
    /// new size.
    fn resize(&self, space: AddressSpace, old_size: usize, new_size: usize) -> Result<usize>;

    /// Free every page of `space`.
    fn destroy(&self, space: AddressSpace);
}

/// Fixed-size allocator for kernel stacks.
pub trait StackAllocator: Send + Sync {
    fn alloc(&self) -> Option<KernelStack>;
    fn free(&self, stack: KernelStack);
}

/// Open-file and directory reference layer.
pub trait FileLayer: Send + Sync {
    fn open(&self, path: &str) -> Result<FileRef>;
    /// Take another reference to an open file.
    fn dup(&self, file: FileRef) -> FileRef;
    /// Drop one reference to an open file.
    fn close(&self, file: FileRef);
    /// A referenced handle to the root directory.
    fn root(&self) -> DirRef;
    fn idup(&self, dir: DirRef) -> DirRef;
    fn iput(&self, dir: DirRef);
}

/// The collaborators a kernel is booted with.
#[derive(Clone)]
pub struct Machine {
    pub vm: Arc<dyn AddressSpaces>,
    pub stacks: Arc<dyn StackAllocator>,
    pub files: Arc<dyn FileLayer>,
}

impl Machine {
    pub fn new(
        vm: Arc<dyn AddressSpaces>,
        stacks: Arc<dyn StackAllocator>,
        files: Arc<dyn FileLayer>,
    ) -> Self {
        Self { vm, stacks, files }
    }

    /// A machine backed by the in-memory simulators with generous budgets.
    pub fn simulated() -> Self {
        Self::new(
            Arc::new(sim::SimAddressSpaces::new(sim::DEFAULT_PAGE_BUDGET)),
            Arc::new(sim::SimStacks::new(sim::DEFAULT_STACK_BUDGET)),
            Arc::new(sim::SimFiles::new()),
        )
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::simulated()
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine").finish_non_exhaustive()
    }
}
