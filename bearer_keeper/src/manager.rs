use std::{ops, sync::Arc};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    acquire::CredentialAcquirer,
    lifecycle::run_lifecycle,
    request::{self, AuthorizeRequest},
    store::CredentialStore,
    ConfigError, Credential, Generation, ManagerConfig,
};

/// The manager stopped before the awaited credential was published
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    /// Renewal was shut down or the renewal task died
    #[error("credential manager has shut down")]
    ShutDown,
}

/// A cheaply cloneable view of a manager's current credential
///
/// All reads are safe to perform from any number of tasks while a renewal is
/// being published; a reader sees either the old or the new credential, never a mix.
#[derive(Clone, Debug)]
pub struct CredentialHandle {
    store: Arc<CredentialStore>,
    cancel: CancellationToken,
}

impl CredentialHandle {
    /// Waits until the first credential has been published
    ///
    /// This keeps waiting across any number of failed acquisitions. If the manager
    /// shuts down before ever publishing a credential, this never returns; use
    /// [`ensure_ready()`][Self::ensure_ready()] to observe shutdown, or impose a timeout.
    pub async fn wait_until_ready(&self) {
        if let Some(gate) = self.store.pending_first_gate() {
            gate.wait().await;
        }
    }

    /// Waits until the first credential has been published, reporting whether one was
    ///
    /// Returns an error if the manager shuts down first.
    pub async fn ensure_ready(&self) -> Result<(), ManagerError> {
        let Some(gate) = self.store.pending_first_gate() else {
            return Ok(());
        };

        tokio::select! {
            biased;
            _ = gate.wait() => Ok(()),
            _ = self.cancel.cancelled() => {
                // Publication may have raced shutdown
                if gate.is_ready() {
                    Ok(())
                } else {
                    Err(ManagerError::ShutDown)
                }
            }
        }
    }

    /// Waits for a credential newer than the current one to be published and returns
    /// its generation
    ///
    /// Returns an error if the manager shuts down first.
    pub async fn renewed(&self) -> Result<Generation, ManagerError> {
        let gate = self.store.next_gate();

        tokio::select! {
            biased;
            _ = gate.wait() => Ok(gate.generation()),
            _ = self.cancel.cancelled() => Err(ManagerError::ShutDown),
        }
    }

    /// The current credential, if one has been published
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.store.read_current()
    }

    /// The generation of the current credential, if one has been published
    pub fn generation(&self) -> Option<Generation> {
        self.store.current_generation()
    }

    /// The current access token, or an empty string if none has been published
    pub fn current_token(&self) -> String {
        self.store
            .read_current()
            .map(|c| c.access_token().as_str().to_owned())
            .unwrap_or_default()
    }

    /// The current `Authorization` value, such as `Bearer abc`, or an empty string if
    /// none has been published
    pub fn current_authorization_value(&self) -> String {
        self.store.snapshot_header_value()
    }

    /// Sets the `Authorization` header on `request` from the current credential
    ///
    /// Returns `true` if the header was set. If no credential has been published yet,
    /// the request is left untouched.
    pub fn apply_to<R>(&self, request: &mut R) -> bool
    where
        R: AuthorizeRequest + ?Sized,
    {
        match self.store.read_current() {
            Some(credential) => request::apply(request, &credential),
            None => {
                tracing::trace!("no credential published yet, leaving request unauthorized");
                false
            }
        }
    }

    /// Whether renewal has stopped
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Owns the background task that keeps a credential renewed
///
/// The manager dereferences to a [`CredentialHandle`] for reads. Dropping the manager
/// stops renewal; handles cloned from it keep serving the last published credential.
#[derive(Debug)]
pub struct CredentialManager {
    handle: CredentialHandle,
    task: Option<JoinHandle<()>>,
}

impl CredentialManager {
    /// Validates `config` and spawns a task that acquires and renews credentials from
    /// `acquirer`
    ///
    /// Returns immediately; the first acquisition happens in the background. Must be
    /// called from within a tokio runtime.
    pub fn spawn<A>(acquirer: A, config: ManagerConfig) -> Result<Self, ConfigError>
    where
        A: CredentialAcquirer + 'static,
    {
        config.validate()?;

        let store = Arc::new(CredentialStore::new());
        let cancel = CancellationToken::new();

        let join = tokio::spawn(run_lifecycle(
            acquirer,
            Arc::clone(&store),
            config,
            cancel.clone(),
        ));

        let supervisor_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            if let Err(err) = join.await {
                if err.is_panic() {
                    tracing::error!("credential renewal panicked!")
                } else if err.is_cancelled() {
                    tracing::info!("credential renewal was aborted")
                }
            }
            supervisor_cancel.cancel();
        });

        Ok(Self {
            handle: CredentialHandle { store, cancel },
            task: Some(task),
        })
    }

    /// A cloneable read handle for the managed credential
    pub fn handle(&self) -> CredentialHandle {
        self.handle.clone()
    }

    /// Stops renewal and waits for the background task to finish
    pub async fn shutdown(mut self) {
        self.handle.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        tracing::debug!("credential manager shut down");
    }
}

impl ops::Deref for CredentialManager {
    type Target = CredentialHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for CredentialManager {
    fn drop(&mut self) {
        self.handle.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use http::header;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;

    const FIFTY_NINE_MINUTES: Duration = Duration::from_secs(59 * 60);

    #[derive(Debug, Error)]
    #[error("authority unavailable")]
    struct Unavailable;

    /// Plays back scripted outcomes, then never completes again
    #[derive(Clone, Default)]
    struct ScriptedAcquirer {
        script: Arc<Mutex<VecDeque<Result<Credential, Unavailable>>>>,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedAcquirer {
        fn new(script: impl IntoIterator<Item = Result<Credential, Unavailable>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into_iter().collect())),
                calls: Default::default(),
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl CredentialAcquirer for ScriptedAcquirer {
        type Error = Unavailable;

        async fn acquire(&mut self) -> Result<Credential, Self::Error> {
            self.calls.lock().push(Instant::now());
            let next = self.script.lock().pop_front();
            match next {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl CredentialAcquirer for AlwaysFails {
        type Error = Unavailable;

        async fn acquire(&mut self) -> Result<Credential, Self::Error> {
            Err(Unavailable)
        }
    }

    fn bearer(token: &str, expires_in: u64) -> Result<Credential, Unavailable> {
        Ok(Credential::bearer(token.to_owned(), expires_in))
    }

    /// Timers never fire early, but may land on the next millisecond tick
    fn assert_elapsed(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual - expected < Duration::from_millis(2),
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    fn hourly() -> ManagerConfig {
        ManagerConfig::default().with_renewal_interval(FIFTY_NINE_MINUTES)
    }

    #[test]
    fn invalid_configuration_is_rejected_before_spawning() {
        let config = ManagerConfig::default().with_minimum_delay(Duration::ZERO);

        let result = CredentialManager::spawn(ScriptedAcquirer::default(), config);

        assert!(matches!(result, Err(ConfigError::ZeroMinimumDelay)));
    }

    mod before_first_credential {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn reads_are_empty_and_requests_are_left_alone() {
            let manager = CredentialManager::spawn(ScriptedAcquirer::default(), hourly()).unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;

            let mut headers = http::HeaderMap::new();

            assert_eq!(manager.current_token(), "");
            assert_eq!(manager.current_authorization_value(), "");
            assert!(manager.current().is_none());
            assert_eq!(manager.generation(), None);
            assert!(!manager.apply_to(&mut headers));
            assert!(headers.get(header::AUTHORIZATION).is_none());
        }

        #[tokio::test(start_paused = true)]
        async fn waiters_are_held_across_failed_acquisitions() {
            let acquirer =
                ScriptedAcquirer::new([Err(Unavailable), Err(Unavailable), bearer("abc", 3600)]);
            let manager = CredentialManager::spawn(acquirer.clone(), hourly()).unwrap();

            let handle = manager.handle();
            let waiter = tokio::spawn(async move {
                handle.wait_until_ready().await;
                handle.current_token()
            });

            tokio::time::sleep(Duration::from_secs(9)).await;
            assert!(!waiter.is_finished());
            assert_eq!(manager.current_token(), "");

            assert_eq!(waiter.await.unwrap(), "abc");
            assert_eq!(acquirer.calls().len(), 3);
        }

        #[tokio::test(start_paused = true)]
        async fn ensure_ready_reports_shutdown() {
            let manager = CredentialManager::spawn(AlwaysFails, hourly()).unwrap();
            let handle = manager.handle();
            let waiter = tokio::spawn({
                let handle = handle.clone();
                async move { handle.ensure_ready().await }
            });

            tokio::time::sleep(Duration::from_secs(30)).await;
            manager.shutdown().await;

            assert_eq!(waiter.await.unwrap(), Err(ManagerError::ShutDown));
            assert!(handle.is_shut_down());
            assert_eq!(handle.current_token(), "");
        }
    }

    mod after_first_credential {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn reads_reflect_the_credential() {
            let acquirer = ScriptedAcquirer::new([bearer("abc", 3600)]);
            let manager = CredentialManager::spawn(acquirer, hourly()).unwrap();

            assert_eq!(manager.ensure_ready().await, Ok(()));

            assert_eq!(manager.current_token(), "abc");
            assert_eq!(manager.current_authorization_value(), "Bearer abc");
            assert_eq!(manager.generation(), Some(Generation(0)));
            assert_eq!(manager.current().unwrap().expires_in(), 3600);
        }

        #[tokio::test(start_paused = true)]
        async fn apply_to_sets_the_authorization_header() {
            let acquirer = ScriptedAcquirer::new([bearer("abc", 3600)]);
            let manager = CredentialManager::spawn(acquirer, hourly()).unwrap();
            manager.wait_until_ready().await;

            let mut request = http::Request::get("https://example.com").body(()).unwrap();

            assert!(manager.apply_to(&mut request));
            assert_eq!(request.headers()[header::AUTHORIZATION], "Bearer abc");
        }

        #[cfg(feature = "reqwest")]
        #[tokio::test(start_paused = true)]
        async fn apply_to_supports_reqwest_requests() {
            let acquirer = ScriptedAcquirer::new([bearer("abc", 3600)]);
            let manager = CredentialManager::spawn(acquirer, hourly()).unwrap();
            manager.wait_until_ready().await;

            let mut request =
                reqwest::Request::new(reqwest::Method::GET, "https://example.com".parse().unwrap());

            assert!(manager.apply_to(&mut request));
            assert_eq!(request.headers()[header::AUTHORIZATION], "Bearer abc");
        }

        #[tokio::test(start_paused = true)]
        async fn failed_renewal_keeps_the_previous_credential() {
            let acquirer = ScriptedAcquirer::new([
                bearer("first", 3600),
                Err(Unavailable),
                bearer("second", 3600),
            ]);
            let manager = CredentialManager::spawn(acquirer, hourly()).unwrap();
            manager.wait_until_ready().await;

            tokio::time::sleep(FIFTY_NINE_MINUTES + Duration::from_secs(1)).await;
            assert_eq!(manager.current_token(), "first");
            assert_eq!(manager.generation(), Some(Generation(0)));

            tokio::time::sleep(Duration::from_secs(5)).await;
            assert_eq!(manager.current_token(), "second");
            assert_eq!(manager.generation(), Some(Generation(1)));
        }

        #[tokio::test(start_paused = true)]
        async fn renewed_waits_for_the_next_generation() {
            let acquirer = ScriptedAcquirer::new([bearer("first", 3600), bearer("second", 3600)]);
            let manager = CredentialManager::spawn(acquirer, hourly()).unwrap();
            manager.wait_until_ready().await;
            let started = Instant::now();

            assert_eq!(manager.renewed().await, Ok(Generation(1)));

            assert_elapsed(started.elapsed(), FIFTY_NINE_MINUTES);
            assert_eq!(manager.current_token(), "second");
        }

        #[tokio::test(start_paused = true)]
        async fn renewed_reports_shutdown() {
            let acquirer = ScriptedAcquirer::new([bearer("first", 3600)]);
            let manager = CredentialManager::spawn(acquirer, hourly()).unwrap();
            manager.wait_until_ready().await;
            let handle = manager.handle();

            manager.shutdown().await;

            assert_eq!(handle.renewed().await, Err(ManagerError::ShutDown));
            assert_eq!(handle.current_token(), "first");
        }
    }

    mod scheduling {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn fixed_interval_ignores_reported_expiry() {
            let acquirer = ScriptedAcquirer::new([
                bearer("a", 10),
                bearer("b", 3600),
                bearer("c", 86_400),
            ]);
            let manager = CredentialManager::spawn(acquirer.clone(), hourly()).unwrap();

            tokio::time::sleep(FIFTY_NINE_MINUTES * 3 + Duration::from_secs(1)).await;

            let calls = acquirer.calls();
            assert_eq!(calls.len(), 4);
            for pair in calls.windows(2) {
                assert_elapsed(pair[1] - pair[0], FIFTY_NINE_MINUTES);
            }
            assert_eq!(manager.current_token(), "c");
        }

        #[tokio::test(start_paused = true)]
        async fn expiry_schedule_renews_ahead_of_expiry() {
            let acquirer = ScriptedAcquirer::new([bearer("a", 600), bearer("b", 600)]);
            let config = ManagerConfig::default()
                .without_renewal_interval()
                .with_expiry_buffer(Duration::from_secs(60));
            let manager = CredentialManager::spawn(acquirer.clone(), config).unwrap();

            tokio::time::sleep(Duration::from_secs(541)).await;

            let calls = acquirer.calls();
            assert_elapsed(calls[1] - calls[0], Duration::from_secs(540));
            assert_eq!(manager.current_token(), "b");
        }

        #[tokio::test(start_paused = true)]
        async fn shutdown_interrupts_the_scheduled_wait() {
            let acquirer = ScriptedAcquirer::new([bearer("a", 3600)]);
            let manager = CredentialManager::spawn(acquirer.clone(), hourly()).unwrap();
            manager.wait_until_ready().await;
            let started = Instant::now();

            manager.shutdown().await;

            assert!(started.elapsed() < Duration::from_secs(1));
            assert_eq!(acquirer.calls().len(), 1);
        }
    }

    mod renewal_hook {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn is_notified_of_each_generation() {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let config = hourly().on_renewed({
                let seen = seen.clone();
                move |credential| seen.lock().push(credential.access_token().as_str().to_owned())
            });
            let acquirer = ScriptedAcquirer::new([bearer("a", 3600), bearer("b", 3600)]);
            let manager = CredentialManager::spawn(acquirer, config).unwrap();
            manager.wait_until_ready().await;

            manager.renewed().await.unwrap();

            assert_eq!(*seen.lock(), vec!["a".to_owned(), "b".to_owned()]);
        }

        #[tokio::test(start_paused = true)]
        async fn panicking_hook_does_not_stop_renewal() {
            let calls = Arc::new(AtomicUsize::new(0));
            let config = hourly().on_renewed({
                let calls = calls.clone();
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    panic!("hook failure");
                }
            });
            let acquirer = ScriptedAcquirer::new([bearer("a", 3600), bearer("b", 3600)]);
            let manager = CredentialManager::spawn(acquirer, config).unwrap();
            manager.wait_until_ready().await;

            assert_eq!(manager.renewed().await, Ok(Generation(1)));

            assert_eq!(manager.current_token(), "b");
            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert!(!manager.is_shut_down());
        }
    }

    mod concurrent_reads {
        use super::*;

        /// Issues `token-000000`, `token-000001`, … as fast as it is asked
        struct Counter(u64);

        #[async_trait]
        impl CredentialAcquirer for Counter {
            type Error = Unavailable;

            async fn acquire(&mut self) -> Result<Credential, Self::Error> {
                let token = format!("token-{:06}", self.0);
                self.0 += 1;
                Ok(Credential::bearer(token, 3600))
            }
        }

        fn serial(token: &str) -> u64 {
            token
                .strip_prefix("token-")
                .filter(|s| s.len() == 6)
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| panic!("torn token: {:?}", token))
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn readers_see_whole_credentials_in_order() {
            let config = ManagerConfig::default().with_renewal_interval(Duration::from_millis(1));
            let manager = CredentialManager::spawn(Counter(0), config).unwrap();
            manager.wait_until_ready().await;

            let readers: Vec<_> = (0..100)
                .map(|_| {
                    let handle = manager.handle();
                    tokio::spawn(async move {
                        let mut last = 0;
                        for _ in 0..200 {
                            let token = handle.current_token();
                            let value = handle.current_authorization_value();
                            let current = serial(&token);
                            assert!(current >= last, "went backwards: {} < {}", current, last);
                            assert!(
                                serial(value.strip_prefix("Bearer ").expect("missing scheme"))
                                    >= current
                            );
                            last = current;
                            tokio::task::yield_now().await;
                        }
                    })
                })
                .collect();

            for reader in readers {
                reader.await.unwrap();
            }

            manager.shutdown().await;
        }
    }

    #[tokio::test]
    async fn dropping_the_manager_stops_renewal() {
        let manager =
            CredentialManager::spawn(ScriptedAcquirer::new([bearer("a", 3600)]), hourly()).unwrap();
        manager.wait_until_ready().await;
        let handle = manager.handle();

        drop(manager);

        assert!(handle.is_shut_down());
        assert_eq!(handle.current_token(), "a");
    }
}
