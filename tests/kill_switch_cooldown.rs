//! Scenario: deactivation is denied with the wrong code or before the
//! cooldown elapses, and succeeds once both conditions hold.

use rust_decimal_macros::dec;
use tradectl::domain::errors::KillSwitchDeactivateError;
use tradectl::kill_switch::{KillSwitch, KillSwitchCondition, KillSwitchConfig};

fn switch(cooldown_minutes: i64) -> std::sync::Arc<KillSwitch> {
    KillSwitch::new(KillSwitchConfig {
        consecutive_loss_threshold: 5,
        api_error_rate_threshold: 0.5,
        network_timeout_seconds: 30,
        cooldown_minutes,
        approval_code: "TEST_CODE_123".to_string(),
        check_interval_seconds: 30,
        max_daily_loss_hard: dec!(500_000),
    })
}

#[tokio::test]
async fn deactivation_is_denied_during_cooldown_and_succeeds_after() {
    // A cooldown of zero minutes means "elapsed immediately" once
    // activated, so the denial path is exercised against the wrong
    // approval code and the success path against the real one.
    let ks = switch(0);
    ks.activate("test", KillSwitchCondition::ManualTrigger).await;

    let denied = ks.deactivate("WRONG_CODE").await;
    assert!(matches!(denied, Err(KillSwitchDeactivateError::InvalidApprovalCode)));
    assert!(ks.status().await.active, "state must be unchanged on a denied deactivation");

    ks.deactivate("TEST_CODE_123").await.expect("correct code after cooldown should succeed");
    assert!(!ks.status().await.active);
}

#[tokio::test]
async fn deactivation_is_denied_before_cooldown_elapses_even_with_the_right_code() {
    let ks = switch(60);
    ks.activate("test", KillSwitchCondition::ManualTrigger).await;

    let denied = ks.deactivate("TEST_CODE_123").await;
    match denied {
        Err(KillSwitchDeactivateError::CooldownNotElapsed { remaining_minutes }) => {
            assert!(remaining_minutes > 0.0 && remaining_minutes <= 60.0);
        }
        other => panic!("expected CooldownNotElapsed, got {other:?}"),
    }
    assert!(ks.status().await.active, "cooldown denial must leave the switch ACTIVE");
}

#[tokio::test]
async fn check_before_order_rejects_while_active() {
    let ks = switch(0);
    ks.check_before_order().await.expect("inactive switch should not block orders");

    ks.activate("manual halt", KillSwitchCondition::ManualTrigger).await;
    let blocked = ks.check_before_order().await;
    assert!(blocked.is_err());
}
