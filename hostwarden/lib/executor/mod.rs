//! Running external system commands.
//!
//! Everything hostwarden does to the host goes through a [`CommandExecutor`]. The executor has
//! no retry logic and no state between calls; a failure (including a timeout) is reported to the
//! caller, which decides what it means.

mod command;
mod process;
mod recording;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use command::*;
pub use process::*;
pub use recording::*;
