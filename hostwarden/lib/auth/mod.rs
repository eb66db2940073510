//! Authentication and authorization of dashboard users.

mod password;
mod principal;
mod service;
mod token;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use password::*;
pub use principal::*;
pub use service::*;
pub use token::*;
