//! Background Tasks Module
//!
//! Periodic work owned by a cache instance.

mod dispatch;

pub use dispatch::spawn_dispatch_task;
