//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod panics;
pub mod rooms;
pub mod scheduled_tasks;

pub use deps::ServerDeps;
pub use rooms::{RoomAccess, RoomConnection, RoomEvent, RoomHub, RoomKey};
pub use scheduled_tasks::{builtin_jobs, start_scheduler, ScheduledJob};
