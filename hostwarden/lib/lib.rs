//! `hostwarden` keeps a single Linux host's firewall allow-list and services in line with what
//! its operators ask for.
//!
//! # Overview
//!
//! hostwarden is the core of a host admin dashboard. It handles:
//! - Firewall rules and temporary address grants, reconciled against firewalld
//! - Starting, stopping and inspecting systemd units
//! - Expiring temporary grants in the background
//! - Streaming live host status to authenticated operators
//!
//! Every change to the host goes through a [`executor::CommandExecutor`], and every change is
//! written to the audit log whether it worked or not.
//!
//! # Modules
//!
//! - [`app`] - Wiring the components together and running the server
//! - [`auth`] - Users, roles, passwords and tokens
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Configuration types and defaults
//! - [`executor`] - Running external commands
//! - [`firewall`] - The firewall reconciler
//! - [`server`] - REST API and status WebSocket
//! - [`service`] - The service controller
//! - [`status`] - Host sampling and the live status broadcaster
//! - [`store`] - SQLite persistence
//! - [`sweeper`] - Background expiry of temporary grants

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod error;

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod executor;
pub mod firewall;
pub mod log;
pub mod models;
pub mod server;
pub mod service;
pub mod status;
pub mod store;
pub mod sweeper;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use error::*;
