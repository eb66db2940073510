//! Live host status: sampling snapshots and pushing them to operator sessions.

mod broadcaster;
mod sampler;
mod session;
mod snapshot;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use broadcaster::*;
pub use sampler::*;
pub use session::*;
pub use snapshot::*;
