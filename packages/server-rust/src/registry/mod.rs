//! In-memory lifecycle state: instances, bindings, asynchronous operations,
//! and the per-instance locks that serialize mutations.

pub mod bindings;
pub mod instances;
pub mod locks;
pub mod operations;

pub use bindings::BindingRegistry;
pub use instances::{InstanceRegistry, SlotReservation};
pub use locks::{InstanceGuard, InstanceLocks};
pub use operations::{OperationTracker, PendingUpdate, TrackedOperation};
