//! Configuration types and defaults.

mod defaults;
mod hostwarden;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use hostwarden::*;
