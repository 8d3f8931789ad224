//! Signed-in identity and the login-code flow.

use std::{sync::Arc, time::Duration};

use serde_json::json;
use shared::{domain::Author, error::ErrorCode, protocol::SendCodeRequest};
use tracing::{info, warn};

use crate::{error::SyncError, transport::Transport};

pub trait IdentityProvider: Send + Sync {
    /// The signed-in author, or `None` when signed out.
    fn current_author(&self) -> Option<Author>;
}

pub struct StaticIdentity(pub Option<Author>);

impl IdentityProvider for StaticIdentity {
    fn current_author(&self) -> Option<Author> {
        self.0.clone()
    }
}

pub struct SendCodeFlow {
    transport: Arc<dyn Transport>,
    retry_delay: Duration,
}

impl SendCodeFlow {
    pub fn new(transport: Arc<dyn Transport>, retry_delay: Duration) -> Self {
        Self {
            transport,
            retry_delay,
        }
    }

    /// Requests a login code.
    ///
    /// The messenger bot may not be linked yet right after sign-up; that one
    /// error is retried once, blindly, after `retry_delay`.
    pub async fn send_login_code(&self, phone: &str) -> Result<(), SyncError> {
        if phone.trim().is_empty() {
            warn!("session: send-code skipped for empty phone");
            return Err(SyncError::validation("phone number is required"));
        }
        let body = serde_json::to_value(SendCodeRequest {
            phone: phone.trim().to_string(),
        })?;

        match self.transport.post("auth/send-code", body.clone()).await {
            Ok(_) => Ok(()),
            Err(err) if err.api_code() == Some(ErrorCode::BotNotLinked) => {
                info!(
                    retry_in = ?self.retry_delay,
                    "session: bot not linked yet; retrying send-code"
                );
                tokio::time::sleep(self.retry_delay).await;
                self.transport.post("auth/send-code", body).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
