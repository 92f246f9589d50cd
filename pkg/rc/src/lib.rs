//! The reconciliation engine.
//!
//! One `ReplicationController` instance runs one watch loop for one
//! controller record: on every change notification (or fallback tick) it
//! recomputes the placement delta and converges the intent tree and pod
//! labels toward the desired replica count. Errors are reported on a
//! channel and never stop the loop; only an explicit, acknowledged quit
//! does.

pub mod controller;
pub mod health;

pub use controller::{ControllerError, ReplicationController, StopHandle, WatchHandle};
pub use health::{HealthMonitor, LoopStatus};
