//! Golden core library: domain types, registry persistence, errors.
//!
//! - [`types`]: newtypes and the repository record
//! - [`error`]: [`RegistryError`]
//! - [`registry`]: the [`Registry`] contract and its YAML-backed implementation

pub mod error;
pub mod registry;
pub mod types;

pub use error::RegistryError;
pub use registry::{FileRegistry, Registry};
pub use types::{RepoAlias, RepositoryRecord, SourceKind, GLOBAL_SUFFIX, LOCAL_SCHEME};
