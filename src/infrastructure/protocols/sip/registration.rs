//! IMS registration (REGISTER with digest authentication and periodic refresh)

use super::auth::AuthenticationAgent;
use super::dialog::{generate_call_id, DialogPath};
use super::factory::SipMessageFactory;
use super::message::{name_addr_param, SipError, SipHeaders, SipResponse};
use super::refresher::{refresh_delay, PeriodicRefresher};
use super::transport::SipTransport;
use crate::config::SipConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct RegistrationState {
    dialog: Option<DialogPath>,
    auth: AuthenticationAgent,
    expire: u32,
}

pub struct RegistrationManager {
    transport: Arc<dyn SipTransport>,
    factory: Arc<SipMessageFactory>,
    config: SipConfig,
    instance_id: String,
    feature_tags: Vec<String>,
    state: Mutex<RegistrationState>,
    registered: AtomicBool,
    refresher: PeriodicRefresher,
}

impl RegistrationManager {
    pub fn new(
        transport: Arc<dyn SipTransport>,
        factory: Arc<SipMessageFactory>,
        config: SipConfig,
        feature_tags: Vec<String>,
    ) -> Arc<Self> {
        let auth = AuthenticationAgent::new(factory.profile().clone());
        Arc::new(Self {
            transport,
            factory,
            instance_id: uuid::Uuid::new_v4().to_string(),
            feature_tags,
            state: Mutex::new(RegistrationState {
                dialog: None,
                auth,
                expire: config.register_expire,
            }),
            config,
            registered: AtomicBool::new(false),
            refresher: PeriodicRefresher::new("registration"),
        })
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// `+sip.instance` value sent in Contact
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Register and keep the registration alive
    pub async fn register(self: &Arc<Self>) -> Result<(), SipError> {
        let requested = self.state.lock().await.expire;
        match self.send_register(requested).await {
            Ok(granted) => {
                self.registered.store(true, Ordering::SeqCst);
                crate::application::metrics::record_registration(true);
                self.schedule_refresh(granted);
                info!("Registered for {}s", granted);
                Ok(())
            }
            Err(e) => {
                self.registered.store(false, Ordering::SeqCst);
                crate::application::metrics::record_registration(false);
                warn!("Registration failed: {}", e);
                Err(e)
            }
        }
    }

    /// Remove the registration (Expires 0) and stop refreshing
    pub async fn unregister(&self) -> Result<(), SipError> {
        self.refresher.stop();
        if !self.registered.swap(false, Ordering::SeqCst) {
            debug!("Not registered, nothing to remove");
            return Ok(());
        }
        self.send_register(0).await?;
        info!("Unregistered");
        Ok(())
    }

    fn schedule_refresh(self: &Arc<Self>, granted: u32) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let ratio = self.config.register_refresh_ratio;
        self.refresher.start(refresh_delay(granted, ratio), move || {
            let weak = weak.clone();
            async move {
                let manager = weak.upgrade()?;
                let requested = manager.state.lock().await.expire;
                match manager.send_register(requested).await {
                    Ok(granted) => {
                        debug!("Registration refreshed for {}s", granted);
                        Some(refresh_delay(granted, ratio))
                    }
                    Err(e) => {
                        warn!("Registration refresh failed: {}", e);
                        manager.registered.store(false, Ordering::SeqCst);
                        None
                    }
                }
            }
        });
    }

    /// One REGISTER transaction, including a 401 retry and a 423 retry.
    /// Returns the granted period.
    async fn send_register(&self, expire: u32) -> Result<u32, SipError> {
        let mut state = self.state.lock().await;
        let profile = self.factory.profile();

        match state.dialog.as_mut() {
            Some(dialog) => {
                dialog.increment_cseq();
            }
            None => {
                state.dialog = Some(DialogPath::originating(
                    generate_call_id(&self.config.local_address),
                    format!("sip:{}", profile.home_domain()),
                    profile.public_uri(),
                    profile.public_uri(),
                    self.config.default_route.clone(),
                ));
            }
        }

        let mut expire = expire;
        let mut interval_retried = false;
        let mut authorize = false;
        loop {
            let RegistrationState { dialog, auth, .. } = &mut *state;
            let dialog = dialog
                .as_ref()
                .ok_or_else(|| SipError::Internal("registration dialog missing".to_string()))?;

            let mut request =
                self.factory
                    .create_register(dialog, &self.feature_tags, expire, Some(&self.instance_id))?;
            if authorize {
                auth.set_authorization_header(&mut request)?;
            }

            debug!("Send REGISTER cseq {} expires {}", dialog.cseq(), expire);
            let response = self
                .transport
                .send_request_and_wait(request, self.config.transaction_timeout())
                .await?
                .ok_or_else(|| SipError::TransactionError("REGISTER timed out".to_string()))?;

            match response.status_code() {
                200..=299 => {
                    if expire > 0 {
                        state.expire = expire;
                    }
                    return Ok(granted_expire(&response, expire));
                }
                401 if !authorize => {
                    auth.read_www_authenticate_header(&response)?;
                    authorize = true;
                }
                401 => {
                    return Err(SipError::Authentication(
                        "REGISTER rejected after authentication".to_string(),
                    ));
                }
                423 if !interval_retried => {
                    let min = response
                        .header("Min-Expires")
                        .and_then(|v| v.trim().parse::<u32>().ok())
                        .ok_or_else(|| SipError::InvalidMessage("423 without Min-Expires".to_string()))?;
                    info!("Registration interval too brief, retrying with {}", min);
                    expire = min;
                    interval_retried = true;
                }
                code => {
                    return Err(SipError::TransactionError(format!(
                        "REGISTER failed: {} {}",
                        code,
                        response.reason_phrase()
                    )));
                }
            }

            if let Some(dialog) = state.dialog.as_mut() {
                dialog.increment_cseq();
            }
        }
    }
}

/// Period granted by the registrar: our Contact's `expires`, then `Expires`, then what we asked
fn granted_expire(response: &SipResponse, requested: u32) -> u32 {
    response
        .header("Contact")
        .and_then(|c| name_addr_param(&c, "expires"))
        .and_then(|v| v.parse().ok())
        .or_else(|| response.header("Expires").and_then(|v| v.trim().parse().ok()))
        .unwrap_or(requested)
}
