//! GitHub device authorization flow.
//!
//! `request_code` fetches a user code for display; `start_polling` spawns a
//! supervised background task that exchanges the device code for an access
//! token once the user approves, then enriches it with profile information.
//! Lifecycle milestones go out on the event channel: `github:auth:started`
//! at spawn, then exactly one of `github:auth:success` or
//! `github:auth:error`.
//!
//! A token that arrives but fails profile enrichment is still stored in the
//! session, but the attempt is reported as an error: a login without a
//! confirmed identity is not a successful login.

mod github;

pub use github::GitHubClient;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::AuthError;
use crate::events::{Event, EventBus};

/// Server-mandated floor for the poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How much a `slow_down` answer adds to the interval.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// One device authorization grant, displayed to the user while polling
/// runs in the background.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds until the grant expires.
    pub expires_in: u64,
    /// Seconds the server wants between polls.
    pub interval: u64,
}

/// OAuth access token, held in memory for the session only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub token_type: String,
    pub scope: String,
}

/// Profile enrichment fetched after the token: display identity and the
/// primary verified email address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Outcome of one token-exchange poll.
#[derive(Debug, Clone)]
pub enum PollResult {
    Authorized(AccessToken),
    Pending,
    SlowDown,
}

/// Transport for the authorization endpoints. The state machine only talks
/// to this trait, so tests drive it with a scripted fake.
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn request_device_code(&self) -> Result<DeviceCode, AuthError>;
    async fn poll_token(&self, device_code: &str) -> Result<PollResult, AuthError>;
    async fn fetch_profile(&self, token: &AccessToken) -> Result<UserProfile, AuthError>;
}

/// The device authorization flow. One attempt may be in flight at a time;
/// the session token is single-writer (the polling task).
pub struct AuthFlow {
    client: Arc<dyn AuthClient>,
    events: EventBus,
    timeout: Duration,
    token: Arc<Mutex<Option<AccessToken>>>,
    in_flight: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
}

impl AuthFlow {
    pub fn new(client: Arc<dyn AuthClient>, events: EventBus, timeout: Duration) -> Self {
        Self {
            client,
            events,
            timeout,
            token: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// The session's access token, if an attempt has obtained one.
    pub fn access_token(&self) -> Option<AccessToken> {
        self.token.lock().expect("token lock").clone()
    }

    /// Request a device code for display. Synchronous from the caller's
    /// view; does not start polling.
    pub async fn request_code(&self) -> Result<DeviceCode, AuthError> {
        self.client.request_device_code().await
    }

    /// Cancel an in-flight polling attempt, if any. The attempt terminates
    /// with a "cancelled" auth error event.
    pub fn cancel(&self) {
        self.cancel.lock().expect("cancel lock").cancel();
    }

    /// Start polling in the background and return immediately so the code
    /// can be shown to the user. Fails if an attempt is already in flight.
    pub fn start_polling(&self, code: DeviceCode) -> Result<JoinHandle<()>, AuthError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AuthError::AttemptInFlight);
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel lock") = cancel.clone();

        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        let token_slot = Arc::clone(&self.token);
        let in_flight = Arc::clone(&self.in_flight);
        let timeout = self.timeout;

        Ok(tokio::spawn(async move {
            events.emit(Event::AuthStarted);
            tracing::info!(user_code = %code.user_code, "waiting for device authorization");

            let outcome = poll_until_terminal(&*client, &code, timeout, &token_slot, &cancel).await;
            match outcome {
                Ok((token, profile)) => {
                    tracing::info!(login = %profile.login, "device authorization succeeded");
                    events.emit(Event::AuthSuccess { token, profile });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "device authorization failed");
                    events.emit(Event::AuthError {
                        message: err.to_string(),
                    });
                }
            }
            in_flight.store(false, Ordering::SeqCst);
        }))
    }
}

/// Poll until authorized, denied, expired, cancelled, or past the deadline.
/// The deadline is the lesser of the configured timeout and the code's own
/// expiry.
async fn poll_until_terminal(
    client: &dyn AuthClient,
    code: &DeviceCode,
    timeout: Duration,
    token_slot: &Mutex<Option<AccessToken>>,
    cancel: &CancellationToken,
) -> Result<(AccessToken, UserProfile), AuthError> {
    let overall = timeout.min(Duration::from_secs(code.expires_in));
    let deadline = Instant::now() + overall;
    let mut interval = Duration::from_secs(code.interval).max(MIN_POLL_INTERVAL);

    loop {
        if Instant::now() + interval >= deadline {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Err(AuthError::TimedOut(overall)),
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }

        match client.poll_token(&code.device_code).await? {
            PollResult::Pending => {}
            PollResult::SlowDown => interval += SLOW_DOWN_STEP,
            PollResult::Authorized(token) => {
                *token_slot.lock().expect("token lock") = Some(token.clone());
                let profile = client.fetch_profile(&token).await?;
                return Ok((token, profile));
            }
        }
    }
}
