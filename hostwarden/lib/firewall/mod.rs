//! Firewall reconciliation: keeps firewalld's allow-list equal to the enabled rules and live
//! temporary grants.

mod address;
mod commands;
mod locks;
mod plan;
mod reconciler;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use address::*;
pub use commands::*;
pub use locks::*;
pub use plan::*;
pub use reconciler::*;
