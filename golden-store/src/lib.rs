//! # golden-store
//!
//! On-disk coordination primitives under the repos root:
//! alias pointers ([`AliasManager`]), cross-process write locks
//! ([`WriteLockManager`]), versioned snapshots ([`snapshot`]), and
//! modification-time change detection ([`MtimeChangeDetector`]).

pub mod alias;
pub mod change;
pub mod error;
pub mod layout;
pub mod lock;
pub mod snapshot;

pub use alias::{AliasManager, AliasPointer};
pub use change::{ChangeDetector, MtimeChangeDetector};
pub use error::StoreError;
pub use layout::RepoLayout;
pub use lock::{LockInfo, WriteLockManager};
