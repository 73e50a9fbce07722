//! Per-hub session
//!
//! Wires the services for one hub connection together and owns their caches.
//! Two sessions never share state, so logging out of one hub cannot leak keys
//! or trust decisions into another.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::crypto::UserKeyPair;
use crate::device::{DeviceKeyStore, SecretStore};
use crate::error::Result;
use crate::grant::AutomaticAccessGrant;
use crate::hub::HubApi;
use crate::prompt::Prompt;
use crate::user_keys::{CachingUserKeyService, HubUserKeyService, UserKeyService};
use crate::vault::VaultCrypto;
use crate::wot::{CachingWotService, HubWotService, WotService};

/// Why an automatic access grant run was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantTrigger {
    Login,
    Interval,
    /// Something changed on the hub (a member joined, a signature arrived)
    HubEvent,
    Manual,
}

/// Cloneable handle for requesting grant runs from anywhere
#[derive(Debug, Clone)]
pub struct GrantDispatcher {
    tx: flume::Sender<GrantTrigger>,
}

impl GrantDispatcher {
    /// Create a dispatcher and the receiver for the scheduler task
    pub fn new() -> (Self, GrantReceiver) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, GrantReceiver { rx })
    }

    /// Non-blocking; fails only once the scheduler has stopped
    pub fn dispatch(&self, trigger: GrantTrigger) -> anyhow::Result<()> {
        tracing::debug!("dispatching automatic access grant: {:?}", trigger);
        self.tx
            .send(trigger)
            .map_err(|_| anyhow::anyhow!("grant scheduler has stopped"))
    }
}

#[derive(Debug)]
pub struct GrantReceiver {
    rx: flume::Receiver<GrantTrigger>,
}

impl GrantReceiver {
    pub async fn recv(&self) -> Option<GrantTrigger> {
        self.rx.recv_async().await.ok()
    }
}

/// Run `grant` on every tick of `interval` and on every dispatched trigger
/// until `shutdown_rx` fires or every dispatcher is dropped
pub fn spawn_grant_scheduler(
    grant: Arc<AutomaticAccessGrant>,
    interval: Duration,
    receiver: GrantReceiver,
    mut shutdown_rx: watch::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        // skip the immediate first tick; login runs are dispatched explicitly
        timer.tick().await;
        tracing::info!(
            "automatic access grant scheduler started, interval {:?}",
            interval
        );

        loop {
            let trigger = tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::info!("automatic access grant scheduler shutting down");
                    break;
                }
                _ = timer.tick() => GrantTrigger::Interval,
                trigger = receiver.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => {
                        tracing::info!("all grant dispatchers dropped, stopping scheduler");
                        break;
                    }
                },
            };

            match grant.run().await {
                Ok(Some(report)) => tracing::debug!(
                    "grant run ({:?}) finished: {} granted, {} failed",
                    trigger,
                    report.granted.len(),
                    report.failures.len()
                ),
                Ok(None) => {}
                Err(e) => tracing::warn!("grant run ({:?}) failed: {}", trigger, e),
            }
        }
    })
}

/// Everything the client keeps for one hub connection
pub struct HubSession {
    hub_id: String,
    config: SessionConfig,
    user_keys: Arc<CachingUserKeyService<HubUserKeyService>>,
    wot: Arc<CachingWotService<HubWotService>>,
    vaults: VaultCrypto,
    grant: Arc<AutomaticAccessGrant>,
}

impl HubSession {
    pub fn new(
        hub_id: impl Into<String>,
        hub: Arc<dyn HubApi>,
        prompt: Arc<dyn Prompt>,
        secrets: Arc<dyn SecretStore>,
        config: SessionConfig,
    ) -> Self {
        let hub_id = hub_id.into();
        let user_keys = Arc::new(CachingUserKeyService::new(HubUserKeyService::new(
            hub_id.clone(),
            hub.clone(),
            prompt,
            DeviceKeyStore::new(secrets),
            config.clone(),
        )));
        let wot = Arc::new(CachingWotService::new(HubWotService::new(
            hub.clone(),
            user_keys.clone(),
        )));
        let grant = Arc::new(AutomaticAccessGrant::new(
            hub.clone(),
            user_keys.clone(),
            wot.clone(),
        ));

        Self {
            hub_id,
            config,
            user_keys,
            wot,
            vaults: VaultCrypto::new(hub),
            grant,
        }
    }

    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Resolve the user keys, prompting if this device is new
    pub async fn login(&self) -> Result<UserKeyPair> {
        let keys = self.user_keys.user_keys().await?;
        tracing::info!("logged in to hub {}", self.hub_id);
        Ok(keys)
    }

    /// Drop every cached key and trust decision
    pub async fn logout(&self) {
        self.user_keys.invalidate().await;
        self.wot.invalidate().await;
        tracing::info!("logged out of hub {}", self.hub_id);
    }

    pub fn user_keys(&self) -> Arc<dyn UserKeyService> {
        self.user_keys.clone()
    }

    pub fn wot(&self) -> Arc<dyn WotService> {
        self.wot.clone()
    }

    pub fn vaults(&self) -> &VaultCrypto {
        &self.vaults
    }

    pub fn automatic_access_grant(&self) -> Arc<AutomaticAccessGrant> {
        self.grant.clone()
    }

    /// Start the grant scheduler with this session's interval, queueing a
    /// first run if the config asks for one at login
    pub fn spawn_grant_scheduler(
        &self,
        shutdown_rx: watch::Receiver<()>,
    ) -> (GrantDispatcher, JoinHandle<()>) {
        let (dispatcher, receiver) = GrantDispatcher::new();
        if self.config.grant_on_login {
            // the receiver is alive until the task below exits
            let _ = dispatcher.dispatch(GrantTrigger::Login);
        }
        let handle = spawn_grant_scheduler(
            self.grant.clone(),
            self.config.grant_interval(),
            receiver,
            shutdown_rx,
        );
        (dispatcher, handle)
    }
}
