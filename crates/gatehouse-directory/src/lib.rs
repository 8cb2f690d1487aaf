//! Account directory for Gatehouse.
//!
//! This crate owns the persistent side of session establishment:
//!
//! 1. **Records** — [`Account`] and [`Avatar`] shapes, the
//!    [`AccessLevel`] ladder, and the [`Record`] envelope the store hands
//!    back (callers validate the variant; a mismatch is a data fault).
//! 2. **Contracts** — [`AccountStore`] (play-token → account identity) and
//!    [`RecordStore`] (the object-database boundary). Any backend that
//!    satisfies these can sit behind the session core.
//! 3. **Reference backends** — [`MemoryAccountStore`]/[`MemoryRecordStore`]
//!    for tests and development, [`FileAccountStore`] for single-host
//!    deployments.
//!
//! # How it fits in the stack
//!
//! ```text
//! Session layer (above)  ← drives login/avatar operations against these traits
//!     ↕
//! Directory layer (this crate)  ← resolves tokens, loads/persists records
//!     ↕
//! Storage engines (below, external)  ← files, document stores, ...
//! ```

mod account;
mod file;
mod memory;
mod store;

pub use account::{
    AccessLevel, Account, Avatar, Record, RemovedAvatar, WishName, unix_now,
};
pub use file::FileAccountStore;
pub use memory::{MemoryAccountStore, MemoryRecordStore};
pub use store::{AccountStore, DirectoryError, Lookup, RecordStore};
