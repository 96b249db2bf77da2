//! Default BlueZ pairing agent.
//!
//! Pairing must never block on an interactive prompt — the daemon runs
//! headless. The agent registers as the stack's default handler and answers
//! every callback from a fixed policy: confirmations and service/device
//! authorizations are always accepted, PIN/passkey requests are answered from
//! configuration or left unhandled (bluer rejects callbacks that are not
//! installed).
//!
//! bluer derives the BlueZ capability string from which callbacks are
//! installed, so the PIN/passkey handlers are only registered in `fixed-pin`
//! mode. In `no-passkey` mode the agent presents as DisplayYesNo (the
//! confirmation handler counts as yes/no input — the closest bluer gets to
//! "no input, no output"), steering hosts toward the confirmation flows the
//! policy accepts instead of the passkey entry it would reject.
//!
//! Each decision is a pure function of the configured policy so it can be
//! unit-tested; the closures below only add logging and the trust side
//! effect.

use bluer::agent::{
    Agent, AgentHandle, AuthorizeService, ReqError, ReqResult, RequestAuthorization,
    RequestConfirmation, RequestPasskey, RequestPinCode,
};
use bluer::{Adapter, Address};
use tracing::{info, warn};

use crate::config::{PairingConfig, PairingMode};

// ─── Policy decisions ───────────────────────────────────────────────────────

/// Legacy PIN request: fixed PIN or rejection.
pub fn decide_pin_code(policy: &PairingConfig) -> ReqResult<String> {
    match policy.mode {
        PairingMode::FixedPin => Ok(policy.pin.clone()),
        PairingMode::NoPasskey => Err(ReqError::Rejected),
    }
}

/// Numeric passkey request: this peripheral has nothing to display, so the
/// only honest answers are the configured fixed value or a rejection.
pub fn decide_passkey(policy: &PairingConfig) -> ReqResult<u32> {
    match policy.mode {
        PairingMode::FixedPin => Ok(policy.passkey),
        PairingMode::NoPasskey => Err(ReqError::Rejected),
    }
}

/// Numeric comparison: always accept. This is the mechanism that lets
/// pairing proceed without any manual passkey entry.
pub fn decide_confirmation() -> ReqResult<()> {
    Ok(())
}

/// Device/service authorization: always accept.
pub fn decide_authorization() -> ReqResult<()> {
    Ok(())
}

/// Whether the agent should handle PIN/passkey callbacks at all. Installing
/// them raises the registered capability to KeyboardDisplay, so outside
/// `fixed-pin` mode they stay uninstalled — bluer rejects the request either
/// way, but the lower capability keeps hosts off passkey-entry flows.
pub fn keyboard_callbacks_enabled(policy: &PairingConfig) -> bool {
    policy.mode == PairingMode::FixedPin
}

// ─── Registration ───────────────────────────────────────────────────────────

/// Mark the remote device trusted so later reconnects skip authorization.
/// Best effort: pairing proceeds even when the property write fails.
async fn trust_device(adapter: &Adapter, address: Address) {
    let result = match adapter.device(address) {
        Ok(device) => device.set_trusted(true).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!("Could not trust {address}: {e}");
    }
}

/// Register our agent with the BlueZ session as the default agent. Returns
/// a handle that must be kept alive for the agent to remain registered.
pub async fn register(
    session: &bluer::Session,
    adapter: &Adapter,
    policy: &PairingConfig,
) -> bluer::Result<AgentHandle> {
    let adapter_confirm = adapter.clone();
    let adapter_authorize = adapter.clone();
    let adapter_service = adapter.clone();

    let mut agent = Agent {
        request_default: true,

        request_confirmation: Some(Box::new(move |req: RequestConfirmation| {
            let adapter = adapter_confirm.clone();
            Box::pin(async move {
                info!(
                    "Confirmation request from {}: passkey {:06} — accepting",
                    req.device, req.passkey
                );
                trust_device(&adapter, req.device).await;
                decide_confirmation()
            })
        })),

        request_authorization: Some(Box::new(move |req: RequestAuthorization| {
            let adapter = adapter_authorize.clone();
            Box::pin(async move {
                info!("Authorization request from {} — accepting", req.device);
                trust_device(&adapter, req.device).await;
                decide_authorization()
            })
        })),

        authorize_service: Some(Box::new(move |req: AuthorizeService| {
            let adapter = adapter_service.clone();
            Box::pin(async move {
                info!(
                    "Service authorization from {} for {} — accepting",
                    req.device, req.service
                );
                trust_device(&adapter, req.device).await;
                decide_authorization()
            })
        })),

        ..Default::default()
    };

    if keyboard_callbacks_enabled(policy) {
        let policy_pin = policy.clone();
        agent.request_pin_code = Some(Box::new(move |req: RequestPinCode| {
            let decision = decide_pin_code(&policy_pin);
            Box::pin(async move {
                info!(
                    "PIN code requested for {}: {}",
                    req.device,
                    outcome(&decision)
                );
                decision
            })
        }));

        let policy_passkey = policy.clone();
        agent.request_passkey = Some(Box::new(move |req: RequestPasskey| {
            let decision = decide_passkey(&policy_passkey);
            Box::pin(async move {
                info!(
                    "Passkey requested for {}: {}",
                    req.device,
                    outcome(&decision)
                );
                decision
            })
        }));
    }

    session.register_agent(agent).await
}

fn outcome<T>(decision: &ReqResult<T>) -> &'static str {
    match decision {
        Ok(_) => "answering with configured value",
        Err(_) => "rejecting",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: PairingMode) -> PairingConfig {
        PairingConfig {
            mode,
            pin: "4711".into(),
            passkey: 123_456,
        }
    }

    #[test]
    fn confirmation_and_authorization_are_always_accepted() {
        // Policy-independent: this is what makes unattended pairing work,
        // and the same decision backs device and service authorization.
        assert!(decide_confirmation().is_ok());
        assert!(decide_authorization().is_ok());
    }

    #[test]
    fn keyboard_callbacks_are_limited_to_fixed_pin_mode() {
        // Uninstalled callbacks are rejected by the binding with the same
        // error, but keep the registered capability below KeyboardDisplay.
        assert!(!keyboard_callbacks_enabled(&policy(PairingMode::NoPasskey)));
        assert!(keyboard_callbacks_enabled(&policy(PairingMode::FixedPin)));
    }

    #[test]
    fn passkey_is_rejected_without_a_fixed_pin() {
        let decision = decide_passkey(&policy(PairingMode::NoPasskey));
        assert!(matches!(decision, Err(ReqError::Rejected)));
    }

    #[test]
    fn passkey_uses_the_configured_value_in_fixed_pin_mode() {
        assert_eq!(
            decide_passkey(&policy(PairingMode::FixedPin)).unwrap(),
            123_456
        );
    }

    #[test]
    fn pin_code_follows_the_same_policy() {
        assert!(matches!(
            decide_pin_code(&policy(PairingMode::NoPasskey)),
            Err(ReqError::Rejected)
        ));
        assert_eq!(
            decide_pin_code(&policy(PairingMode::FixedPin)).unwrap(),
            "4711"
        );
    }
}
