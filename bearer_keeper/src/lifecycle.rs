use std::{
    error,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
    acquire::CredentialAcquirer,
    backoff::{ErrorBackoffHandler, WithBackoff},
    store::CredentialStore,
    Credential, Generation, ManagerConfig, Schedule,
};

/// Acquires, publishes, and renews credentials until cancelled
pub(crate) async fn run_lifecycle<A>(
    mut acquirer: A,
    store: Arc<CredentialStore>,
    config: ManagerConfig,
    cancel: CancellationToken,
) where
    A: CredentialAcquirer,
{
    let mut backoff_handler = ErrorBackoffHandler::new(config.retry_backoff());

    loop {
        let generation = store.current_gate().generation();
        tracing::debug!(%generation, "requesting new credential");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = acquirer.acquire() => outcome,
        };

        let delay = match outcome.with_backoff(&mut backoff_handler) {
            Ok(credential) => publish(&store, &config, credential).delay(),
            Err((error, delay)) => {
                tracing::warn!(
                    %generation,
                    error = (&error as &dyn error::Error),
                    delay_ms = saturating_millis(delay),
                    "error acquiring credential, will retry"
                );
                delay
            }
        };

        if !sleep_unless_cancelled(delay, &cancel).await {
            break;
        }
    }

    tracing::info!("credential renewal cancelled, halting renewals");
}

fn publish(store: &CredentialStore, config: &ManagerConfig, credential: Credential) -> Schedule {
    let schedule = config.schedule_for(&credential);
    let expires_in = credential.expires_in();

    let published = Arc::new(credential);
    let generation = store.publish(Arc::clone(&published));

    tracing::info!(
        %generation,
        expires_in,
        has_scope = published.scope().is_some(),
        "published new credential"
    );

    if let Some(hook) = config.renewal_hook() {
        notify(hook.as_ref(), &published, generation);
    }

    match schedule {
        Schedule::Fixed(delay) => {
            tracing::debug!(delay_secs = delay.as_secs(), "renewing after fixed interval")
        }
        Schedule::FromExpiry(delay) => {
            tracing::debug!(delay_secs = delay.as_secs(), "renewing ahead of reported expiry")
        }
    }

    store.advance();
    schedule
}

fn notify(
    hook: &(dyn Fn(&Credential) + Send + Sync),
    credential: &Credential,
    generation: Generation,
) {
    if catch_unwind(AssertUnwindSafe(|| hook(credential))).is_err() {
        tracing::error!(%generation, "renewal hook panicked, ignoring");
    }
}

fn saturating_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Returns `false` if cancellation won the race
async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
