mod common;

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use common::{FixedSource, Harness};
use hostwarden::{
    auth::{AuthService, JwtAuthenticator, Principal, Role, UserRequest},
    server::{create_router, ServerState},
    service::ServiceController,
    status::Broadcaster,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const SECRET: &[u8] = b"server-test-secret-0123456789abcdef";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

struct TestServer {
    harness: Harness,
    base: String,
    client: reqwest::Client,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TestServer {
    async fn start() -> anyhow::Result<Self> {
        Self::start_with_proxies(vec![]).await
    }

    async fn start_with_proxies(trusted_proxies: Vec<IpAddr>) -> anyhow::Result<Self> {
        let harness = Harness::new().await?;

        let tokens = Arc::new(JwtAuthenticator::new(SECRET, chrono::Duration::hours(1)));
        let auth = Arc::new(AuthService::new(
            harness.store.clone(),
            harness.store.clone(),
            tokens.clone(),
        ));
        auth.bootstrap_admin(Some("admin-password")).await?;

        let system = Principal::system();
        for (username, role) in [("otto", Role::Operator), ("vera", Role::Viewer)] {
            auth.create_user(
                &system,
                UserRequest::builder()
                    .username(username)
                    .password(format!("{username}-password"))
                    .email(format!("{username}@example.com"))
                    .role(role)
                    .build(),
            )
            .await?;
        }

        let broadcaster = Arc::new(Broadcaster::new(
            Arc::new(FixedSource),
            tokens.clone(),
            Duration::from_millis(50),
        ));
        let state = ServerState::builder()
            .auth(auth)
            .authenticator(tokens)
            .reconciler(harness.reconciler.clone())
            .controller(Arc::new(ServiceController::new(
                harness.executor.clone(),
                harness.store.clone(),
                "systemctl",
            )))
            .sampler(Arc::new(FixedSource))
            .broadcaster(broadcaster)
            .audit(harness.store.clone())
            .trusted_proxies(Arc::new(trusted_proxies))
            .build();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = create_router(state);
        tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });

        Ok(Self {
            harness,
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn login(&self, username: &str, password: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        Ok(body["token"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("no token in {body}"))?
            .to_string())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_login_and_bearer_auth() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let response = server
        .client
        .post(server.url("/api/auth/login"))
        .json(&json!({ "username": "admin", "password": "wrong" }))
        .send()
        .await?;
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await?;
    assert_eq!(body["code"], 401);
    assert_eq!(body["errorType"], "authentication_error");

    let response = server
        .client
        .get(server.url("/api/firewall/rules"))
        .send()
        .await?;
    assert_eq!(response.status(), 401);

    let token = server.login("admin", "admin-password").await?;
    let response = server
        .client
        .get(server.url("/api/servers/stats"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["cpu"]["cores"], 4);
    assert_eq!(body["load"].as_array().map(Vec::len), Some(3));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_rule_lifecycle_over_http() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("admin", "admin-password").await?;
    let viewer = server.login("vera", "vera-password").await?;

    let response = server
        .client
        .post(server.url("/api/firewall/rules"))
        .bearer_auth(&viewer)
        .json(&json!({ "sourceIp": "10.0.0.5" }))
        .send()
        .await?;
    assert_eq!(response.status(), 403);

    let response = server
        .client
        .post(server.url("/api/firewall/rules"))
        .bearer_auth(&admin)
        .json(&json!({ "sourceIp": "10.0.0.300" }))
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    let response = server
        .client
        .post(server.url("/api/firewall/rules"))
        .bearer_auth(&admin)
        .json(&json!({ "sourceIp": "10.0.0.5", "description": "office" }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let rule: Value = response.json().await?;
    let id = rule["id"].as_i64().ok_or_else(|| anyhow::anyhow!("no id"))?;
    assert_eq!(rule["sourceIp"], "10.0.0.5");
    assert_eq!(rule["enabled"], true);

    let rules: Value = server
        .client
        .get(server.url("/api/firewall/rules"))
        .bearer_auth(&viewer)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(rules.as_array().map(Vec::len), Some(1));

    server.harness.executor.fail_when("--reload");
    let response = server
        .client
        .put(server.url(&format!("/api/firewall/rules/{id}")))
        .bearer_auth(&admin)
        .json(&json!({ "sourceIp": "10.0.0.5", "enabled": false }))
        .send()
        .await?;
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await?;
    assert_eq!(body["errorType"], "firewall_error");

    let response = server
        .client
        .delete(server.url("/api/firewall/rules/9999"))
        .bearer_auth(&admin)
        .send()
        .await?;
    assert_eq!(response.status(), 404);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_allow_my_ip_ignores_untrusted_forwarded_header() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let viewer = server.login("vera", "vera-password").await?;

    let response = server
        .client
        .post(server.url("/api/firewall/allow-my-ip"))
        .bearer_auth(&viewer)
        .header("X-Forwarded-For", "0.0.0.0/0")
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let grant: Value = response.json().await?;
    assert_eq!(grant["ipAddress"], "127.0.0.1");

    let lines = server.harness.executor.command_lines();
    assert!(lines.iter().all(|line| !line.contains("0.0.0.0/0")), "{lines:?}");
    assert_eq!(
        server.harness.admitted().into_iter().collect::<Vec<_>>(),
        vec!["127.0.0.1"]
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_allow_my_ip_behind_trusted_proxy() -> anyhow::Result<()> {
    let server = TestServer::start_with_proxies(vec!["127.0.0.1".parse()?]).await?;
    let viewer = server.login("vera", "vera-password").await?;

    let response = server
        .client
        .post(server.url("/api/firewall/allow-my-ip"))
        .bearer_auth(&viewer)
        .header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
        .json(&json!({ "description": "hotel wifi" }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let grant: Value = response.json().await?;
    assert_eq!(grant["ipAddress"], "203.0.113.7");
    assert_eq!(grant["description"], "hotel wifi");

    // Even a trusted proxy cannot open a whole block.
    for block in ["0.0.0.0/0", "203.0.113.0/24"] {
        let response = server
            .client
            .post(server.url("/api/firewall/allow-my-ip"))
            .bearer_auth(&viewer)
            .header("X-Forwarded-For", block)
            .send()
            .await?;
        assert_eq!(response.status(), 400, "{block}");
        let body: Value = response.json().await?;
        assert_eq!(body["errorType"], "validation_error");
    }

    // Without the header the peer address is used, and the body is optional.
    let response = server
        .client
        .post(server.url("/api/firewall/allow-my-ip"))
        .bearer_auth(&viewer)
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let grant: Value = response.json().await?;
    assert_eq!(grant["ipAddress"], "127.0.0.1");

    let grants: Value = server
        .client
        .get(server.url("/api/firewall/grants"))
        .bearer_auth(&viewer)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(grants.as_array().map(Vec::len), Some(2));
    assert!(server
        .harness
        .executor
        .command_lines()
        .iter()
        .all(|line| !line.contains('/')));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_service_control_and_logs() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let operator = server.login("otto", "otto-password").await?;
    let viewer = server.login("vera", "vera-password").await?;

    let response = server
        .client
        .post(server.url("/api/server/control/restart"))
        .bearer_auth(&operator)
        .json(&json!({ "service": "nginx" }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let response = server
        .client
        .post(server.url("/api/server/control/reboot"))
        .bearer_auth(&operator)
        .json(&json!({ "service": "nginx" }))
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    let response = server
        .client
        .post(server.url("/api/server/control/restart"))
        .bearer_auth(&viewer)
        .json(&json!({ "service": "nginx" }))
        .send()
        .await?;
    assert_eq!(response.status(), 403);

    let response = server.client.get(server.url("/api/logs")).send().await?;
    assert_eq!(response.status(), 401);

    let logs: Value = server
        .client
        .get(server.url("/api/logs"))
        .bearer_auth(&viewer)
        .send()
        .await?
        .json()
        .await?;
    let logs = logs
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("logs are not a list"))?;
    assert!(logs
        .iter()
        .any(|entry| entry["action"] == "reboot" && entry["outcome"] == "rejected: invalid action"));
    assert!(logs
        .iter()
        .any(|entry| entry["action"] == "restart" && entry["succeeded"] == true));
    assert!(logs
        .iter()
        .any(|entry| entry["actorUsername"] == "vera" && entry["succeeded"] == false));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_user_management_is_admin_only() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("admin", "admin-password").await?;
    let operator = server.login("otto", "otto-password").await?;

    let response = server
        .client
        .get(server.url("/api/users"))
        .bearer_auth(&operator)
        .send()
        .await?;
    assert_eq!(response.status(), 403);

    let new_user = json!({
        "username": "nina",
        "password": "nina-password",
        "email": "nina@example.com",
        "role": "operator",
    });
    let response = server
        .client
        .post(server.url("/api/users"))
        .bearer_auth(&admin)
        .json(&new_user)
        .send()
        .await?;
    assert_eq!(response.status(), 201);

    let response = server
        .client
        .post(server.url("/api/users"))
        .bearer_auth(&admin)
        .json(&new_user)
        .send()
        .await?;
    assert_eq!(response.status(), 409);

    let users: Value = server
        .client
        .get(server.url("/api/users"))
        .bearer_auth(&admin)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(users.as_array().map(Vec::len), Some(4));
    assert!(users
        .as_array()
        .into_iter()
        .flatten()
        .all(|user| user.get("passwordHash").is_none()));
    Ok(())
}
