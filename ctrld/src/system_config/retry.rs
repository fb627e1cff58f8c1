use std::{sync::Arc, time::Duration};

use tokio::{
    task::{JoinError, JoinHandle},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use super::{OSConfig, OSConfigurator};
use crate::common::{config::OsDnsConfig, error::Error};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Fixed-interval polling until `timeout` elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// The configurator's own timeout unless `os_dns` overrides it.
    pub fn for_configurator(
        configurator: &dyn OSConfigurator,
        os_dns: Option<&OsDnsConfig>,
    ) -> Self {
        let timeout = os_dns
            .and_then(|c| c.reconfig_timeout())
            .unwrap_or_else(|| configurator.reconfig_timeout());
        Self::new(timeout)
    }
}

fn spawn_attempt(
    configurator: &Arc<dyn OSConfigurator>,
    config: &OSConfig,
) -> JoinHandle<Result<(), Error>> {
    let configurator = configurator.clone();
    let config = config.clone();
    tokio::task::spawn_blocking(move || configurator.set_dns(&config))
}

fn attempt_outcome(joined: Result<Result<(), Error>, JoinError>) -> Result<(), Error> {
    joined.map_err(|e| Error::AnyhowError(anyhow::anyhow!("set_dns task failed: {}", e)))?
}

/// Applies `config`, retrying every failure alike until the policy's
/// deadline, and returns the last error if none succeeded.
///
/// Firing `cancel` stops the loop. An attempt already in flight cannot be
/// interrupted, so it is awaited before returning; its outcome counts like
/// any other. If `cancel` fires before the first attempt, `Error::Cancelled`
/// is returned.
pub async fn set_dns_with_retry(
    configurator: Arc<dyn OSConfigurator>,
    config: &OSConfig,
    policy: RetryPolicy,
    cancel: Option<&CancellationToken>,
) -> Result<(), Error> {
    let deadline = Instant::now() + policy.timeout;
    let mut last_err = None;
    let mut attempts = 0u32;

    loop {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            break;
        }

        let mut task = spawn_attempt(&configurator, config);
        let mut cancelled = false;
        let joined = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    cancelled = true;
                    None
                }
                r = &mut task => Some(r),
            },
            None => Some((&mut task).await),
        };
        let joined = match joined {
            Some(joined) => joined,
            None => {
                tracing::debug!("dns: cancelled, waiting for the in-flight attempt");
                task.await
            }
        };
        let outcome = attempt_outcome(joined);
        attempts += 1;

        match outcome {
            Ok(()) => {
                tracing::info!(
                    mode = configurator.mode(),
                    attempts,
                    "dns: os configuration applied"
                );
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(?e, attempts, "dns: set_dns attempt failed");
                last_err = Some(e);
            }
        }
        if cancelled {
            break;
        }

        if Instant::now() >= deadline {
            break;
        }
        match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(policy.interval) => {}
            },
            None => tokio::time::sleep(policy.interval).await,
        }
        if Instant::now() >= deadline {
            break;
        }
    }

    let err = last_err.unwrap_or(Error::Cancelled);
    tracing::warn!(?err, attempts, "dns: giving up on os configuration");
    Err(err)
}
