//! Control of systemd units.

mod action;
mod controller;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use action::*;
pub use controller::*;
