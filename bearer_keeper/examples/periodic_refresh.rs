use std::time::Duration;

use async_trait::async_trait;
use bearer_keeper::{
    acquire::CredentialAcquirer, backoff::ErrorBackoffConfig, Credential, CredentialManager,
    ManagerConfig,
};
use clap::Parser;
use rand::{distributions::Alphanumeric, Rng};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// Lifetime, in seconds, of the credentials issued by the simulated authority
    #[arg(short, long, env, default_value_t = 3600)]
    lifetime: u64,

    /// Fixed renewal interval in seconds; zero renews relative to reported expiry instead
    #[arg(short, long, env, default_value_t = 59 * 60)]
    renewal_interval: u64,

    /// Seconds before reported expiry to renew, when no fixed interval is set
    #[arg(short, long, env, default_value_t = 60)]
    expiry_buffer: u64,

    /// Seconds to wait before retrying a failed acquisition
    #[arg(long, env, default_value_t = 5)]
    retry_delay: u64,

    /// Probability that the simulated authority fails a request
    #[arg(short, long, env, default_value_t = 0.25)]
    failure_rate: f64,

    /// Seconds between simulated outgoing requests
    #[arg(short = 'p', long, env, default_value_t = 10)]
    request_period: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("simulated authority returned 503 Service Unavailable")]
struct AuthorityUnavailable;

/// Stands in for a token endpoint, issuing random opaque tokens
struct SimulatedAuthority {
    lifetime: u64,
    failure_rate: f64,
}

#[async_trait]
impl CredentialAcquirer for SimulatedAuthority {
    type Error = AuthorityUnavailable;

    async fn acquire(&mut self) -> Result<Credential, Self::Error> {
        time::sleep(Duration::from_millis(250)).await;

        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.failure_rate) {
            return Err(AuthorityUnavailable);
        }

        let token: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();

        Ok(Credential::bearer(token, self.lifetime).with_scope("read write"))
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = ManagerConfig::default()
        .with_renewal_interval(Duration::from_secs(opts.renewal_interval))
        .with_expiry_buffer(Duration::from_secs(opts.expiry_buffer))
        .with_retry_backoff(ErrorBackoffConfig::fixed(Duration::from_secs(opts.retry_delay)))
        .on_renewed(|credential| {
            tracing::info!(
                token = format_args!("{:#?}", credential.access_token()),
                expires_in = credential.expires_in(),
                "new access token"
            );
        });

    let authority = SimulatedAuthority {
        lifetime: opts.lifetime,
        failure_rate: opts.failure_rate.clamp(0.0, 1.0),
    };

    let manager = CredentialManager::spawn(authority, config)?;

    tracing::info!("waiting for initial credential");
    manager.ensure_ready().await?;
    tracing::info!(
        token = format_args!("{:#?}", manager.current().map(|c| c.access_token().to_owned())),
        "first access token"
    );

    let mut interval = time::interval(Duration::from_secs(opts.request_period));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let mut request = http::Request::get("https://httpbin.org/get").body(())?;
                if manager.apply_to(&mut request) {
                    tracing::debug!(
                        generation = ?manager.generation(),
                        sensitive = request
                            .headers()
                            .get(http::header::AUTHORIZATION)
                            .map_or(false, |v| v.is_sensitive()),
                        "authorized outgoing request"
                    );
                } else {
                    tracing::warn!("no credential available for outgoing request");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.shutdown().await;
    Ok(())
}
