pub mod directory;
mod locks;

pub use directory::{ensure, list, remove_subfolder, remove_tree, subfolder_path, StoredEntry};
pub use locks::{PathGuard, PathLocks};
