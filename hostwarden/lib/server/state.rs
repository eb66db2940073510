//! Shared state handed to every request handler.

use std::{net::IpAddr, sync::Arc};

use getset::Getters;
use typed_builder::TypedBuilder;

use crate::{
    auth::{AuthService, Authenticator},
    firewall::FirewallReconciler,
    service::ServiceController,
    status::{Broadcaster, SnapshotSource},
    store::AuditLog,
};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// Shared server state.
///
/// Cheap to clone; every component sits behind an `Arc`.
#[derive(Clone, TypedBuilder, Getters)]
#[getset(get = "pub")]
pub struct ServerState {
    /// Logins and user management.
    auth: Arc<AuthService>,

    /// Turns bearer tokens into principals.
    authenticator: Arc<dyn Authenticator>,

    /// Firewall rules and temporary grants.
    reconciler: Arc<FirewallReconciler>,

    /// systemd unit control.
    controller: Arc<ServiceController>,

    /// One-off snapshots for `GET /api/servers/stats`.
    sampler: Arc<dyn SnapshotSource>,

    /// Live status sessions.
    broadcaster: Arc<Broadcaster>,

    /// Read side of the audit log.
    audit: Arc<dyn AuditLog>,

    /// Peers whose `X-Forwarded-For` header is believed.
    #[builder(default)]
    trusted_proxies: Arc<Vec<IpAddr>>,
}
