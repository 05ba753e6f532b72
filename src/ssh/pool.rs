use super::descriptor::{resolve_probe_timeout, ConnectionDescriptor};
use super::session::{Connector, RemoteShell};
use crate::constants::markers::{PROBE_COMMAND, PROBE_MARKER};
use crate::errors::ConnectError;
use crate::services::logger::Logger;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type SessionHandle = Arc<Mutex<Box<dyn RemoteShell>>>;

type Slot = Arc<Mutex<Option<SessionHandle>>>;

/// Cache of live shells keyed by `username@host:port`.
///
/// Each key owns a slot mutex, so probing and reconnecting one host never
/// blocks callers working with another host.
pub struct SessionPool {
    connector: Arc<dyn Connector>,
    slots: Mutex<HashMap<String, Slot>>,
    logger: Logger,
    probe_timeout: Duration,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

impl SessionPool {
    pub fn new(connector: Arc<dyn Connector>, logger: Logger) -> Self {
        Self {
            connector,
            slots: Mutex::new(HashMap::new()),
            logger: logger.child("pool"),
            probe_timeout: resolve_probe_timeout(),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn slot(&self, key: &str) -> Slot {
        lock(&self.slots)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Returns the cached shell when it was opened with the same session
    /// settings and still answers the echo probe, otherwise replaces it with
    /// a freshly connected one.
    pub fn get_or_create(
        &self,
        descriptor: &ConnectionDescriptor,
        force_new: bool,
    ) -> Result<SessionHandle, ConnectError> {
        let key = descriptor.key();
        let slot = self.slot(&key);
        let mut cached = lock(&slot);

        if let Some(handle) = cached.take() {
            let stale = !lock(&handle).descriptor().same_session(descriptor);
            if !force_new && !stale && self.probe(&handle) {
                self.logger.debug(
                    "Reusing session",
                    Some(&serde_json::json!({ "target": key })),
                );
                *cached = Some(handle.clone());
                return Ok(handle);
            }
            self.logger.info(
                "Replacing session",
                Some(&serde_json::json!({
                    "target": key,
                    "forced": force_new,
                    "settings_changed": stale,
                })),
            );
            lock(&handle).disconnect();
        }

        let shell = self.connector.connect(descriptor).map_err(|err| {
            self.logger.warn(
                "Connect failed",
                Some(&serde_json::json!({ "target": key, "error": err })),
            );
            err
        })?;
        let handle: SessionHandle = Arc::new(Mutex::new(shell));
        *cached = Some(handle.clone());
        Ok(handle)
    }

    fn probe(&self, handle: &SessionHandle) -> bool {
        let mut shell = lock(handle);
        if !shell.is_connected() {
            return false;
        }
        let output = shell.execute(
            PROBE_COMMAND,
            Some(self.probe_timeout),
            &CancellationToken::new(),
        );
        output.text.contains(PROBE_MARKER)
    }

    /// Drops and disconnects the session cached under `key`.
    pub fn remove(&self, key: &str) -> bool {
        let slot = lock(&self.slots).remove(key);
        let Some(slot) = slot else {
            return false;
        };
        let handle = lock(&slot).take();
        match handle {
            Some(handle) => {
                lock(&handle).disconnect();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&self) -> usize {
        let slots: Vec<Slot> = lock(&self.slots).drain().map(|(_, slot)| slot).collect();
        let mut closed = 0;
        for slot in slots {
            if let Some(handle) = lock(&slot).take() {
                lock(&handle).disconnect();
                closed += 1;
            }
        }
        if closed > 0 {
            self.logger
                .info("Closed all sessions", Some(&serde_json::json!({ "count": closed })));
        }
        closed
    }

    /// Keys with a cached session, sorted. Never waits on a busy slot.
    pub fn keys(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = lock(&self.slots)
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();
        // A slot locked by a connect or probe in flight counts as occupied.
        let mut keys: Vec<String> = slots
            .into_iter()
            .filter(|(_, slot)| match slot.try_lock() {
                Ok(cached) => cached.is_some(),
                Err(TryLockError::WouldBlock) => true,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_some(),
            })
            .map(|(key, _)| key)
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.close_all();
    }
}
