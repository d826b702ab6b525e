pub mod contract;
pub mod git;
pub mod types;
pub mod worktree;

pub use git::*;
pub use types::*;
pub use worktree::*;
