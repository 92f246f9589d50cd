//! Coordination-store abstraction: key-value storage with prefix listing,
//! conditional writes, change watches, advisory locks, and bounded retries.
//!
//! Controllers never talk to a concrete database; they hold an
//! `Arc<dyn KvStore>` and rely on per-key conditional writes for
//! cross-process correctness.

pub mod client;
pub mod lock;
pub mod paths;
pub mod retry;
pub mod store;
pub mod watch;

pub use store::{KvStore, MemoryStore};
pub use watch::{EventKind, EventLog, WatchEvent};
