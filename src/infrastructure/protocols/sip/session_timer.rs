//! SIP session timers (RFC 4028)

use super::message::SipError;
use super::refresher::PeriodicRefresher;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Session side of the timer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRefreshHandler: Send + Sync {
    /// Send one refresh (UPDATE) and wait for its answer
    async fn send_refresh(&self) -> Result<(), SipError>;

    /// The session is no longer kept alive and must be torn down.
    /// Must not block.
    fn session_expired(&self);
}

pub struct SessionTimerManager {
    refresher: PeriodicRefresher,
    last_refresh: Arc<Mutex<Instant>>,
    expire: Mutex<u32>,
}

impl SessionTimerManager {
    pub fn new() -> Self {
        Self {
            refresher: PeriodicRefresher::new("session-timer"),
            last_refresh: Arc::new(Mutex::new(Instant::now())),
            expire: Mutex::new(0),
        }
    }

    /// Start the timer for an established session.
    ///
    /// The refresher side sends a refresh every `expire / 2`. The other side
    /// expects one within `expire` and ends the session when none arrives.
    pub fn start(&self, handler: Arc<dyn SessionRefreshHandler>, expire: u32, local_refresher: bool) {
        if expire == 0 {
            return;
        }
        *self.expire.lock().unwrap_or_else(|e| e.into_inner()) = expire;
        self.receive_refresh();

        let period = Duration::from_secs(u64::from(expire));
        info!(
            "Session timer started: {}s, local refresher: {}",
            expire, local_refresher
        );

        if local_refresher {
            let half = period / 2;
            self.refresher.start(half, move || {
                let handler = handler.clone();
                async move {
                    match handler.send_refresh().await {
                        Ok(()) => Some(half),
                        Err(e) => {
                            warn!("Session refresh failed: {}", e);
                            handler.session_expired();
                            None
                        }
                    }
                }
            });
        } else {
            let last_refresh = self.last_refresh.clone();
            self.refresher.start(period, move || {
                let handler = handler.clone();
                let last_refresh = last_refresh.clone();
                async move {
                    let elapsed = last_refresh
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .elapsed();
                    if elapsed >= period {
                        warn!("No session refresh received within {:?}", period);
                        handler.session_expired();
                        None
                    } else {
                        Some(period - elapsed)
                    }
                }
            });
        }
    }

    /// A refresh (UPDATE or re-INVITE) arrived from the peer
    pub fn receive_refresh(&self) {
        *self.last_refresh.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn expire(&self) -> u32 {
        *self.expire.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.refresher.is_running()
    }

    pub fn stop(&self) {
        self.refresher.stop();
    }
}

impl Default for SessionTimerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_refresher_sends_every_half_period() {
        let mut handler = MockSessionRefreshHandler::new();
        handler.expect_send_refresh().times(3).returning(|| Ok(()));
        handler.expect_session_expired().never();

        let timer = SessionTimerManager::new();
        timer.start(Arc::new(handler), 100, true);

        tokio::time::sleep(Duration::from_secs(160)).await;
        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_expires_session() {
        let mut handler = MockSessionRefreshHandler::new();
        handler
            .expect_send_refresh()
            .times(1)
            .returning(|| Err(SipError::TransactionError("timeout".to_string())));
        handler.expect_session_expired().times(1).return_const(());

        let timer = SessionTimerManager::new();
        timer.start(Arc::new(handler), 100, true);

        tokio::time::sleep(Duration::from_secs(500)).await;
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_refresh_expires_session() {
        let mut handler = MockSessionRefreshHandler::new();
        handler.expect_send_refresh().never();
        handler.expect_session_expired().times(1).return_const(());

        let timer = SessionTimerManager::new();
        timer.start(Arc::new(handler), 100, false);

        tokio::time::sleep(Duration::from_secs(60)).await;
        timer.receive_refresh();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(timer.is_running());

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(!timer.is_running());
    }
}
