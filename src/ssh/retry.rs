use super::descriptor::ConnectionDescriptor;
use super::pool::{SessionHandle, SessionPool};
use super::session::RemoteShell;
use crate::constants::markers::{PROBE_COMMAND, PROBE_MARKER};
use crate::constants::network::TIMEOUT_REACHABILITY_MS;
use crate::constants::retry::{MAX_DELAY_MS, SLEEP_SLICE_MS};
use crate::errors::{CommandFailure, RetryError};
use crate::services::logger::Logger;
use serde::Serialize;
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Online,
    Degraded,
    Offline,
}

impl HostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HostStatus::Online => "online",
            HostStatus::Degraded => "degraded",
            HostStatus::Offline => "offline",
        }
    }
}

/// Called with the host's new status and the pool key.
pub type StatusHook = Arc<dyn Fn(HostStatus, &str) + Send + Sync>;

/// Cheap liveness check run on the session before every attempt.
pub type ReachabilityCheck =
    Arc<dyn Fn(&mut dyn RemoteShell, &CancellationToken) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Per-attempt budget handed to the operation.
    pub timeout: Option<Duration>,
    pub max_delay: Duration,
    /// Fraction of the delay randomly added or removed; 0 disables jitter.
    pub jitter: f64,
    pub deadline: Option<Instant>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            timeout: None,
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            jitter: 0.0,
            deadline: None,
        }
    }

    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> Self {
        Self::new(descriptor.retry_count, descriptor.retry_delay)
            .with_timeout(descriptor.command_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// No retry starts if its backoff sleep would end past `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_deadline_in(self, budget: Duration) -> Self {
        self.with_deadline(Instant::now() + budget)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Sleep before retry number `attempt` (1-based): `retry_delay * 2^(attempt-1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry_delay.as_millis() as f64;
        let factor: f64 = 2.0;
        let max_delay = self.max_delay.as_millis() as f64;
        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let mut delay = base * factor.powi(exponent);
        if delay > max_delay {
            delay = max_delay;
        }
        if self.jitter > 0.0 {
            let delta = delay * self.jitter;
            delay = delay - delta + rand::random::<f64>() * delta * 2.0;
        }
        Duration::from_millis(delay.max(0.0) as u64)
    }
}

/// What the operation knows about the attempt it is running in.
pub struct AttemptContext<'a> {
    /// 1-based.
    pub attempt: u32,
    pub max_attempts: u32,
    pub timeout: Option<Duration>,
    pub cancel: &'a CancellationToken,
}

/// Runs an operation against a pooled session with bounded retries.
///
/// Every attempt passes the reachability check before the operation runs,
/// and retries always force a fresh session. Terminal connect errors and
/// non-transport failures end the run at once.
pub struct RetryWrapper {
    pool: Arc<SessionPool>,
    logger: Logger,
    status_hook: Option<StatusHook>,
    reachability: Option<ReachabilityCheck>,
}

impl RetryWrapper {
    pub fn new(pool: Arc<SessionPool>, logger: Logger) -> Self {
        Self {
            pool,
            logger: logger.child("retry"),
            status_hook: None,
            reachability: None,
        }
    }

    pub fn with_status_hook(mut self, hook: StatusHook) -> Self {
        self.status_hook = Some(hook);
        self
    }

    pub fn with_reachability_check(mut self, check: ReachabilityCheck) -> Self {
        self.reachability = Some(check);
        self
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    fn report(&self, status: HostStatus, key: &str) {
        if let Some(hook) = self.status_hook.as_ref() {
            hook(status, key);
        }
    }

    pub fn run<T, F>(
        &self,
        descriptor: &ConnectionDescriptor,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(&mut dyn RemoteShell, &AttemptContext<'_>) -> Result<T, CommandFailure>,
    {
        let key = descriptor.key();
        let max_attempts = policy.max_attempts();
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;

        for retry in 0..max_attempts {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts });
            }
            if retry > 0 {
                let delay = policy.backoff_delay(retry);
                if let Some(deadline) = policy.deadline {
                    if Instant::now() + delay >= deadline {
                        self.logger.warn(
                            "Retry deadline reached",
                            Some(&serde_json::json!({ "target": key, "attempts": attempts })),
                        );
                        break;
                    }
                }
                self.logger.info(
                    "Retrying",
                    Some(&serde_json::json!({
                        "target": key,
                        "attempt": retry + 1,
                        "max_attempts": max_attempts,
                        "delay_ms": delay.as_millis() as u64,
                        "last_error": last_error,
                    })),
                );
                if !sleep_cancellable(delay, cancel) {
                    return Err(RetryError::Cancelled { attempts });
                }
            }
            attempts += 1;

            let handle: SessionHandle = match self.pool.get_or_create(descriptor, retry > 0) {
                Ok(handle) => handle,
                Err(err) if err.is_terminal() => {
                    self.logger.error(
                        "Connection rejected",
                        Some(&serde_json::json!({ "target": key, "error": err })),
                    );
                    self.report(HostStatus::Offline, &key);
                    return Err(RetryError::Terminal {
                        attempt: attempts,
                        error: err,
                    });
                }
                Err(err) => {
                    last_error = Some(err.to_string());
                    self.report(HostStatus::Degraded, &key);
                    continue;
                }
            };
            let mut shell: MutexGuard<'_, Box<dyn RemoteShell>> =
                handle.lock().unwrap_or_else(|err| err.into_inner());

            if let Some(check) = self.reachability.as_ref() {
                if let Err(reason) = check(&mut **shell, cancel) {
                    self.logger.warn(
                        "Reachability check failed",
                        Some(&serde_json::json!({
                            "target": key,
                            "attempt": attempts,
                            "reason": reason,
                        })),
                    );
                    last_error = Some(reason);
                    self.report(HostStatus::Degraded, &key);
                    continue;
                }
            }

            let context = AttemptContext {
                attempt: attempts,
                max_attempts,
                timeout: policy.timeout,
                cancel,
            };
            match op(&mut **shell, &context) {
                Ok(value) => {
                    self.report(HostStatus::Online, &key);
                    return Ok(value);
                }
                Err(failure) if failure.is_retryable() => {
                    self.logger.warn(
                        "Attempt failed",
                        Some(&serde_json::json!({
                            "target": key,
                            "attempt": attempts,
                            "failure": failure,
                        })),
                    );
                    last_error = Some(failure.message().to_string());
                    self.report(HostStatus::Degraded, &key);
                }
                Err(failure) => {
                    return Err(RetryError::Failed {
                        attempt: attempts,
                        failure,
                    })
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts });
        }
        let last_error = last_error.unwrap_or_else(|| "no attempt completed".to_string());
        self.logger.error(
            "Operation failed",
            Some(&serde_json::json!({
                "target": key,
                "attempts": attempts,
                "last_error": last_error,
            })),
        );
        self.report(HostStatus::Offline, &key);
        Err(RetryError::Exhausted {
            attempts,
            last_error,
        })
    }
}

/// Reachability by echo round trip; the default for non-Docker commands.
pub fn echo_reachability() -> ReachabilityCheck {
    Arc::new(|shell: &mut dyn RemoteShell, cancel: &CancellationToken| {
        let output = shell.execute(
            PROBE_COMMAND,
            Some(Duration::from_millis(TIMEOUT_REACHABILITY_MS)),
            cancel,
        );
        if output.text.contains(PROBE_MARKER) {
            Ok(())
        } else {
            Err(format!("host did not answer the echo probe ({:?})", output.status))
        }
    })
}

/// Sleeps in short slices; returns `false` if cancelled first.
pub fn sleep_cancellable(total: Duration, cancel: &CancellationToken) -> bool {
    let until = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= until {
            return true;
        }
        std::thread::sleep((until - now).min(Duration::from_millis(SLEEP_SLICE_MS)));
    }
}
