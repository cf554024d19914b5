//! Background renewal of one outbound identity's token.

use crate::{
    config::ClientTokenConfig,
    now_unix,
    oauth::client::{fetch_token, resolve, Snapshot},
    vault::VaultResolver,
};
use reqwest::Client;
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

/// Wait before retrying after a failed fetch or resolution.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// When the next renewal is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalSchedule {
    lead_time_secs: i64,
    expires_at: Option<i64>,
}

impl RenewalSchedule {
    #[must_use]
    pub fn new(lead_time: Duration) -> Self {
        Self {
            lead_time_secs: i64::try_from(lead_time.as_secs()).unwrap_or(i64::MAX),
            expires_at: None,
        }
    }

    /// Due when nothing is cached yet, when the expiry is unknown, or once fewer
    /// than the lead time's seconds remain before it.
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        self.expires_at
            .map_or(true, |exp| exp.saturating_sub(now) <= self.lead_time_secs)
    }

    pub fn record(&mut self, expires_at: Option<i64>) {
        self.expires_at = expires_at;
    }
}

pub(crate) struct RenewalTask {
    pub(crate) config: ClientTokenConfig,
    pub(crate) resolver: Arc<VaultResolver>,
    pub(crate) http: Client,
    pub(crate) tx: watch::Sender<Snapshot>,
    pub(crate) cancel: CancellationToken,
    pub(crate) backoff: Duration,
}

impl RenewalTask {
    /// Runs until cancelled. The only writer of its identity's snapshot.
    pub(crate) async fn run(self) {
        let span = info_span!("oauth.renew", config_id = %self.config.id);
        async move {
            if !self.ensure_resolved().await {
                return;
            }

            let mut schedule = RenewalSchedule::new(self.config.lead_time());

            loop {
                if schedule.is_due(now_unix()) {
                    let credential = self.tx.borrow().credential.clone();
                    let Some(credential) = credential else {
                        return;
                    };

                    let result = tokio::select! {
                        () = self.cancel.cancelled() => break,
                        result = fetch_token(&self.http, &credential) => result,
                    };

                    match result {
                        Ok(token) => {
                            debug!(expires_at = ?token.expires_at, "Token renewed");
                            schedule.record(token.expires_at);
                            self.tx.send_modify(|snapshot| snapshot.token = Some(token));
                        }
                        Err(e) => {
                            error!("Unable to retrieve OAuth2 token from IDP: {e}");
                            if !self.pause(self.backoff).await {
                                break;
                            }
                            continue;
                        }
                    }
                }

                if !self.pause(self.config.check_interval()).await {
                    break;
                }
            }

            info!("Renewal task stopped");
        }
        .instrument(span)
        .await;
    }

    /// Resolve credentials if startup could not. Returns false once cancelled.
    async fn ensure_resolved(&self) -> bool {
        while self.tx.borrow().credential.is_none() {
            match resolve(&self.config, &self.resolver).await {
                Ok(credential) => {
                    info!("OAuth client credentials resolved");
                    self.tx
                        .send_modify(|snapshot| snapshot.credential = Some(Arc::new(credential)));
                }
                Err(e) => {
                    error!("Unable to resolve OAuth client credentials: {e}");
                    if !self.pause(self.backoff).await {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Sleep for `duration` unless cancelled first. Returns false when cancelled.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = sleep(duration) => true,
        }
    }
}
