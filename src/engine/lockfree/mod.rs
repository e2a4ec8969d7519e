//! ### English
//! Lock-free primitives shared across the overlay threads.
//!
//! These utilities are designed for hot paths (atomics, spin/yield backoff, mailbox handoff).
//!
//! ### 中文
//! 各 overlay 线程复用的无锁原语。
//!
//! 这些工具面向热路径设计（原子操作、短自旋/让出调度退避、mailbox 传递）。
mod backoff;
mod mailbox;
mod oneshot;
mod snapshot;
mod versioned;
mod wake;

pub(crate) use backoff::Backoff;
pub use mailbox::{Mailbox, MailboxStats, Publish};
pub(crate) use oneshot::OneShot;
pub use snapshot::SnapshotCell;
pub use versioned::{VersionedArc, VersionedReader};
pub use wake::ThreadWaker;
