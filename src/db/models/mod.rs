//! Database models split into separate files.

pub mod expansion_task;
pub mod slot;

pub use self::expansion_task::*;
pub use self::slot::*;
