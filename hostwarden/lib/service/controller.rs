use std::sync::Arc;

use crate::{
    auth::Principal,
    executor::{CommandError, CommandExecutor, CommandOutput, SystemCommand},
    models::{AuditCategory, NewAuditEntry},
    store::AuditLog,
    HostwardenResult,
};

use super::{ServiceAction, ServiceName};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Starts, stops, restarts and inspects systemd units on behalf of operators.
///
/// Every call leaves exactly one audit entry, whether it was rejected, failed or succeeded.
pub struct ServiceController {
    executor: Arc<dyn CommandExecutor>,
    audit: Arc<dyn AuditLog>,
    program: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ServiceController {
    /// Creates a controller that drives `program` (usually `systemctl`).
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        audit: Arc<dyn AuditLog>,
        program: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            audit,
            program: program.into(),
        }
    }

    /// The command that carries out `action` on `service`.
    pub fn command(&self, action: ServiceAction, service: &ServiceName) -> SystemCommand {
        SystemCommand::new(&self.program)
            .arg(action.as_str())
            .arg("--")
            .arg(service.as_str())
    }

    /// Runs `action` against `service` and returns what the service manager printed.
    ///
    /// Admins and operators only. Output is returned verbatim.
    pub async fn control_service(
        &self,
        action: &str,
        service: &str,
        actor: &Principal,
    ) -> HostwardenResult<CommandOutput> {
        if let Err(e) = actor.require_operator("control services") {
            self.record(actor, action, service, "rejected: permission denied", false)
                .await;
            return Err(e);
        }

        let parsed_action = match action.parse::<ServiceAction>() {
            Ok(action) => action,
            Err(e) => {
                self.record(actor, action, service, "rejected: invalid action", false)
                    .await;
                return Err(e);
            }
        };

        let name = match ServiceName::parse(service) {
            Ok(name) => name,
            Err(e) => {
                self.record(actor, action, service, "rejected: invalid service name", false)
                    .await;
                return Err(e);
            }
        };

        let command = self.command(parsed_action, &name);
        tracing::info!(actor = %actor.username, action = %parsed_action, service = %name, "controlling service");

        match self.executor.execute(&command).await {
            Ok(output) => {
                self.record(actor, action, service, &describe_output(&output), true)
                    .await;
                Ok(output)
            }
            Err(e) => {
                tracing::warn!(%command, error = %e, "service command failed");
                self.record(actor, action, service, &describe_error(&e), false)
                    .await;
                Err(e.into())
            }
        }
    }

    async fn record(
        &self,
        actor: &Principal,
        action: &str,
        service: &str,
        outcome: &str,
        succeeded: bool,
    ) {
        let entry = NewAuditEntry::builder()
            .actor_username(actor.username.as_str())
            .category(AuditCategory::Service)
            .action(action)
            .target(service)
            .outcome(outcome)
            .succeeded(succeeded)
            .build();

        if let Err(e) = self.audit.append(entry).await {
            tracing::error!(error = %e, action, service, "failed to write audit entry");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn describe_output(output: &CommandOutput) -> String {
    match (output.stdout.trim(), output.stderr.trim()) {
        ("", "") => "ok".to_string(),
        (stdout, "") => stdout.to_string(),
        ("", stderr) => stderr.to_string(),
        (stdout, stderr) => format!("{stdout}\n{stderr}"),
    }
}

fn describe_error(error: &CommandError) -> String {
    match error {
        CommandError::NonZeroExit {
            code,
            stdout,
            stderr,
            ..
        } => {
            let detail = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            format!("exit status {code}: {detail}")
        }
        other => other.to_string(),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::Role, executor::RecordingExecutor, store::SqliteStore, HostwardenError};
    use tempfile::{tempdir, TempDir};

    async fn controller() -> (TempDir, Arc<RecordingExecutor>, Arc<SqliteStore>, ServiceController) {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("svc.db")).await.unwrap());
        let executor = Arc::new(RecordingExecutor::new());
        let controller = ServiceController::new(executor.clone(), store.clone(), "systemctl");
        (dir, executor, store, controller)
    }

    #[tokio::test]
    async fn test_restart_runs_one_command_and_audits() -> anyhow::Result<()> {
        let (_dir, executor, store, controller) = controller().await;
        executor.respond_with("restart -- nginx", "restarted");
        let ops = Principal::new(2, "ops", Role::Operator);

        let output = controller.control_service("restart", "nginx", &ops).await?;

        assert_eq!(output.stdout, "restarted");
        assert_eq!(executor.command_lines(), ["systemctl restart -- nginx"]);

        let audit = store.recent(10).await?;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].category, AuditCategory::Service);
        assert_eq!(audit[0].actor_username, "ops");
        assert_eq!(audit[0].action, "restart");
        assert_eq!(audit[0].target, "nginx");
        assert_eq!(audit[0].outcome, "restarted");
        assert!(audit[0].succeeded);
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_is_audited_and_returned() -> anyhow::Result<()> {
        let (_dir, executor, store, controller) = controller().await;
        executor.fail_when("stop");
        let admin = Principal::new(1, "root", Role::Admin);

        let err = controller
            .control_service("stop", "sshd", &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, HostwardenError::Command(_)));

        let audit = store.recent(10).await?;
        assert_eq!(audit.len(), 1);
        assert!(!audit[0].succeeded);
        assert_eq!(audit[0].outcome, "exit status 1: scripted failure");
        Ok(())
    }

    #[tokio::test]
    async fn test_rejections_are_audited_without_commands() -> anyhow::Result<()> {
        let (_dir, executor, store, controller) = controller().await;
        let viewer = Principal::new(3, "eve", Role::Viewer);
        let ops = Principal::new(2, "ops", Role::Operator);

        let err = controller
            .control_service("restart", "nginx", &viewer)
            .await
            .unwrap_err();
        assert!(matches!(err, HostwardenError::PermissionDenied(_)));

        let err = controller
            .control_service("reboot", "nginx", &ops)
            .await
            .unwrap_err();
        assert!(matches!(err, HostwardenError::InvalidInput(_)));

        assert!(executor.command_lines().is_empty());

        let outcomes: Vec<_> = store
            .recent(10)
            .await?
            .into_iter()
            .map(|e| (e.outcome, e.succeeded))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("rejected: invalid action".to_string(), false),
                ("rejected: permission denied".to_string(), false),
            ]
        );
        Ok(())
    }
}
