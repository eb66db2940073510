mod common;

use std::time::Duration;

use common::Harness;
use hostwarden::{
    auth::Role,
    executor::RecordingExecutor,
    firewall::{ReconcileStep, RuleInput, SourceAddress},
    store::RuleStore,
    HostwardenError,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const ALLOW_5: &str = "firewall-cmd --permanent --zone=public --add-source=10.0.0.5";
const REVOKE_5: &str = "firewall-cmd --permanent --zone=public --remove-source=10.0.0.5";
const ALLOW_6: &str = "firewall-cmd --permanent --zone=public --add-source=10.0.0.6";
const RELOAD: &str = "firewall-cmd --reload";

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_create_then_delete_round_trip() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let admin = h.user("root", Role::Admin).await?;

    let input = RuleInput::builder()
        .source_ip("10.0.0.5")
        .description("office")
        .build();
    let rule = h.reconciler.create_rule(&input, &admin).await?;

    assert_eq!(h.executor.command_lines(), vec![ALLOW_5, RELOAD]);
    let stored = h.store.get_rule(rule.id).await?;
    assert_eq!(stored.source_ip.as_str(), "10.0.0.5");
    assert!(stored.enabled);
    assert_eq!(stored.created_by_username.as_deref(), Some("root"));

    h.executor.clear_history();
    h.reconciler.delete_rule(rule.id, &admin).await?;

    assert_eq!(h.executor.command_lines(), vec![REVOKE_5, RELOAD]);
    assert!(matches!(
        h.store.get_rule(rule.id).await,
        Err(HostwardenError::NotFound(_))
    ));
    assert!(h.admitted().is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_reapplying_the_same_rule_issues_nothing() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let admin = h.user("root", Role::Admin).await?;

    let input = RuleInput::builder().source_ip("10.0.0.5").build();
    let rule = h.reconciler.create_rule(&input, &admin).await?;
    h.executor.clear_history();

    let again = h.reconciler.update_rule(rule.id, &input, &admin).await?;

    assert!(h.executor.command_lines().is_empty());
    assert_eq!(again, rule);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_invalid_addresses_are_rejected_before_any_command() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let admin = h.user("root", Role::Admin).await?;

    for bad in [
        "",
        "10.0.0",
        "10.0.0.256",
        "10.0.0.5/33",
        "10.0.0.5; rm -rf /",
        "::1",
        "example.com",
        " 10.0.0.5",
    ] {
        let input = RuleInput::builder().source_ip(bad).build();
        let result = h.reconciler.create_rule(&input, &admin).await;
        assert!(
            matches!(result, Err(HostwardenError::InvalidInput(_))),
            "{bad:?} was not rejected"
        );
    }

    assert!(h.executor.command_lines().is_empty());
    assert!(h.store.list_rules().await?.is_empty());

    for good in ["0.0.0.0/0", "192.168.1.0/24", "255.255.255.255", "10.0.0.5/32"] {
        let input = RuleInput::builder().source_ip(good).build();
        h.reconciler.create_rule(&input, &admin).await?;
    }
    assert_eq!(h.store.list_rules().await?.len(), 4);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_failed_allow_new_leaves_store_unchanged() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let admin = h.user("root", Role::Admin).await?;

    let rule = h
        .reconciler
        .create_rule(&RuleInput::builder().source_ip("10.0.0.5").build(), &admin)
        .await?;
    h.executor.clear_history();
    h.executor.fail_when("--add-source=10.0.0.6");

    let moved = RuleInput::builder().source_ip("10.0.0.6").build();
    let err = h
        .reconciler
        .update_rule(rule.id, &moved, &admin)
        .await
        .unwrap_err();

    match err {
        HostwardenError::ReconciliationFailure { step, command, .. } => {
            assert_eq!(step, ReconcileStep::AllowNew);
            assert_eq!(command, ALLOW_6);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The old address was already revoked; no reload was attempted.
    assert_eq!(h.executor.command_lines(), vec![REVOKE_5, ALLOW_6]);
    assert_eq!(h.store.get_rule(rule.id).await?, rule);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_concurrent_toggles_on_one_address_are_serialized() -> anyhow::Result<()> {
    let h = Harness::with_executor(RecordingExecutor::new().with_delay(Duration::from_millis(20)))
        .await?;
    let admin = h.user("root", Role::Admin).await?;

    let rule = h
        .reconciler
        .create_rule(&RuleInput::builder().source_ip("10.0.0.5").build(), &admin)
        .await?;
    let id = rule.id;
    h.executor.clear_history();

    let mut tasks = Vec::new();
    for round in 0..6 {
        let reconciler = h.reconciler.clone();
        let admin = admin.clone();
        let input = RuleInput::builder()
            .source_ip("10.0.0.5")
            .description(format!("round {round}"))
            .enabled(round % 2 == 1)
            .build();
        tasks.push(tokio::spawn(async move {
            reconciler.update_rule(id, &input, &admin).await
        }));
    }
    for task in tasks {
        task.await??;
    }

    // Every mutation is a single command followed by its own reload.
    let lines = h.executor.command_lines();
    assert_eq!(lines.len() % 2, 0);
    for pair in lines.chunks(2) {
        assert!(pair[0] == ALLOW_5 || pair[0] == REVOKE_5, "{pair:?}");
        assert_eq!(pair[1], RELOAD);
    }

    // Allows and revokes alternate, since each diff is taken against the last applied state.
    for window in lines.iter().step_by(2).collect::<Vec<_>>().windows(2) {
        assert_ne!(window[0], window[1]);
    }

    let stored = h.store.get_rule(rule.id).await?;
    assert_eq!(h.admitted().contains("10.0.0.5"), stored.enabled);
    assert!(h.reconciler.locks().active() == 0);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_different_addresses_proceed_concurrently() -> anyhow::Result<()> {
    let h = Harness::with_executor(RecordingExecutor::new().with_delay(Duration::from_millis(50)))
        .await?;
    let admin = h.user("root", Role::Admin).await?;

    let started = std::time::Instant::now();
    let mut tasks = Vec::new();
    for last in 1..=4 {
        let reconciler = h.reconciler.clone();
        let admin = admin.clone();
        tasks.push(tokio::spawn(async move {
            let input = RuleInput::builder()
                .source_ip(format!("10.0.1.{last}"))
                .build();
            reconciler.create_rule(&input, &admin).await
        }));
    }
    for task in tasks {
        task.await??;
    }

    // Serialized, four rules would take at least 8 * 50ms.
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(h.admitted().len(), 4);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_grant_shares_address_with_rule() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let admin = h.user("root", Role::Admin).await?;
    let viewer = h.user("vera", Role::Viewer).await?;

    let grant = h
        .reconciler
        .allow_address("10.0.0.5", "laptop", &viewer)
        .await?;
    assert_eq!(grant.user_id, viewer.id);
    assert_eq!(h.executor.command_lines(), vec![ALLOW_5, RELOAD]);

    // The rule needs nothing new: the grant already admits the address.
    let rule = h
        .reconciler
        .create_rule(&RuleInput::builder().source_ip("10.0.0.5").build(), &admin)
        .await?;
    assert_eq!(h.executor.command_lines().len(), 2);

    // Revoking the grant must not cut off the rule.
    h.reconciler.revoke_grant(grant.id, &viewer).await?;
    assert_eq!(h.executor.command_lines().len(), 2);
    assert!(h.admitted().contains("10.0.0.5"));

    h.reconciler.delete_rule(rule.id, &admin).await?;
    assert!(h.admitted().is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_grants_are_limited_to_single_hosts() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let viewer = h.user("vera", Role::Viewer).await?;

    for block in ["0.0.0.0/0", "10.0.0.0/8", "10.0.0.5/32"] {
        let result = h.reconciler.allow_address(block, "", &viewer).await;
        assert!(
            matches!(result, Err(HostwardenError::InvalidInput(_))),
            "{block} was not rejected"
        );
    }

    assert!(h.executor.command_lines().is_empty());
    assert!(h.store.list_grants().await?.is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_update_retries_when_rule_moves_while_waiting() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let admin = h.user("root", Role::Admin).await?;

    let rule = h
        .reconciler
        .create_rule(&RuleInput::builder().source_ip("10.0.0.5").build(), &admin)
        .await?;
    let id = rule.id;
    h.executor.clear_history();

    let guard = h
        .reconciler
        .locks()
        .lock(&SourceAddress::parse("10.0.0.5")?)
        .await;

    // Both edits read the rule at 10.0.0.5 and queue on its lock, the move first.
    let mover = tokio::spawn({
        let (reconciler, admin) = (h.reconciler.clone(), admin.clone());
        let input = RuleInput::builder().source_ip("10.0.0.6").build();
        async move { reconciler.update_rule(id, &input, &admin).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let editor = tokio::spawn({
        let (reconciler, admin) = (h.reconciler.clone(), admin.clone());
        let input = RuleInput::builder()
            .source_ip("10.0.0.7")
            .description("moved again")
            .build();
        async move { reconciler.update_rule(id, &input, &admin).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.executor.command_lines().is_empty());

    drop(guard);
    mover.await??;
    let updated = editor.await??;

    // The second edit was diffed against 10.0.0.6, not the stale 10.0.0.5.
    assert_eq!(updated.source_ip.as_str(), "10.0.0.7");
    assert_eq!(updated.description, "moved again");
    assert_eq!(
        h.executor.command_lines(),
        vec![
            REVOKE_5,
            ALLOW_6,
            RELOAD,
            "firewall-cmd --permanent --zone=public --remove-source=10.0.0.6",
            "firewall-cmd --permanent --zone=public --add-source=10.0.0.7",
            RELOAD,
        ]
    );
    assert_eq!(
        h.admitted().into_iter().collect::<Vec<_>>(),
        vec!["10.0.0.7"]
    );
    assert_eq!(h.reconciler.locks().active(), 0);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_delete_follows_rule_moved_while_waiting() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let admin = h.user("root", Role::Admin).await?;

    let rule = h
        .reconciler
        .create_rule(&RuleInput::builder().source_ip("10.0.0.5").build(), &admin)
        .await?;
    let id = rule.id;
    h.executor.clear_history();

    let guard = h
        .reconciler
        .locks()
        .lock(&SourceAddress::parse("10.0.0.5")?)
        .await;

    let mover = tokio::spawn({
        let (reconciler, admin) = (h.reconciler.clone(), admin.clone());
        let input = RuleInput::builder().source_ip("10.0.0.6").build();
        async move { reconciler.update_rule(id, &input, &admin).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let deleter = tokio::spawn({
        let (reconciler, admin) = (h.reconciler.clone(), admin.clone());
        async move { reconciler.delete_rule(id, &admin).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    drop(guard);
    mover.await??;
    deleter.await??;

    assert_eq!(
        h.executor.command_lines(),
        vec![
            REVOKE_5,
            ALLOW_6,
            RELOAD,
            "firewall-cmd --permanent --zone=public --remove-source=10.0.0.6",
            RELOAD,
        ]
    );
    assert!(h.admitted().is_empty());
    assert!(matches!(
        h.store.get_rule(id).await,
        Err(HostwardenError::NotFound(_))
    ));
    Ok(())
}
