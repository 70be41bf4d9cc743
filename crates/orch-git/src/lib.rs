pub mod branch;
pub mod command;
pub mod diff;
pub mod error;
pub mod remote;
pub mod worktree;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use branch::*;
pub use command::*;
pub use diff::*;
pub use error::*;
pub use remote::*;
pub use worktree::*;
