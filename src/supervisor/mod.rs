//! Child process supervision.
//!
//! The supervised command runs with the parent's environment plus
//! `TSPLUG_ACTIVE=1`. Its stdout and stderr are relayed line by line into the
//! log, and its exit result is delivered exactly once through
//! [`ChildHandle::wait`]. Cancelling the shared token terminates it.

mod child;
mod error;

pub use child::{
    ACTIVE_ENV_VAR, ChildHandle, ChildSupervisor, DEFAULT_GRACE_PERIOD, ExitResult, OutputStream,
    relay_output,
};
pub use error::SpawnError;
