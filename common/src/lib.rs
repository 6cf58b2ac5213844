//! Shared primitives used by the peer/channel control plane: ids, amounts,
//! backoff, shutdown signalling, and the task join-handle wrapper.

pub mod amount;
pub mod backoff;
pub mod ids;
pub mod shutdown;
pub mod task;
