//! Durable state: firewall rules, temporary grants, users and the audit log.

mod db;
mod repository;
mod sqlite;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use db::*;
pub use repository::*;
pub use sqlite::*;
