use chrono::Utc;
use derive_more::with_trait::Display;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Value, json};

use crate::modules::error::{Error, Result};
use crate::modules::transport::{ApiClient, Transport};
use crate::modules::types::{AccessResponse, UserInfo};

/// Tokens a non-admin spends to open one link.
pub const ACCESS_COST: i64 = 10;

/// The identified user. `token_balance` only ever holds a value the server sent.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("user {user_id} ({token_balance} tokens)")]
pub struct Session {
    pub user_id: i64,
    pub token_balance: i64,
    pub is_admin: bool,
    pub is_premium: bool,
}

impl Session {
    fn degraded(user_id: i64) -> Self {
        Self {
            user_id,
            token_balance: 0,
            is_admin: false,
            is_premium: false,
        }
    }

    /// Loads the user's balance and flags. A failed lookup leaves a session
    /// with no tokens and no admin rights so browsing keeps working.
    pub async fn load<T: Transport>(client: &ApiClient<T>, user_id: i64) -> Self {
        let info = client
            .get_json::<UserInfo>(&format!("/api/user/{user_id}/info"), &[])
            .await
            .and_then(|info| match info.error {
                Some(error) => Err(Error::Application(error)),
                None => Ok(info),
            });
        match info {
            Ok(info) => {
                debug!("User {user_id} loaded: admin={}, balance={}", info.is_admin, info.token_balance);
                Self {
                    user_id,
                    token_balance: info.token_balance,
                    is_admin: info.is_admin,
                    is_premium: info.is_premium,
                }
            }
            Err(err) => {
                warn!("Could not load user {user_id}, continuing without balance: {err}");
                Self::degraded(user_id)
            }
        }
    }

    /// Spends tokens on `link`. The balance is replaced by the server's
    /// `remaining_balance`, never computed locally.
    pub async fn access_link<T: Transport>(
        &mut self,
        client: &ApiClient<T>,
        link: &str,
    ) -> Result<AccessReceipt> {
        if self.token_balance < ACCESS_COST {
            return Err(Error::InsufficientTokens {
                balance: self.token_balance,
                required: ACCESS_COST,
            });
        }

        let body = json!({"user_id": self.user_id, "link": link});
        let response: AccessResponse = client.post_json("/api/links/access", &[], &body).await?;
        if !response.success {
            return Err(Error::Application(
                response.error.unwrap_or_else(|| "Failed to access link".to_string()),
            ));
        }

        self.token_balance = response.remaining_balance;
        let receipt = AccessReceipt {
            tokens_deducted: response.tokens_deducted,
            remaining_balance: response.remaining_balance,
        };
        info!("Accessed {link}: {receipt}");
        Ok(receipt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessReceipt {
    pub tokens_deducted: i64,
    pub remaining_balance: i64,
}

impl AccessReceipt {
    pub fn message(&self) -> String {
        if self.tokens_deducted == 0 {
            "Admin access - No tokens deducted".to_string()
        } else {
            format!(
                "{} tokens deducted. Remaining: {}",
                self.tokens_deducted, self.remaining_balance
            )
        }
    }
}

impl std::fmt::Display for AccessReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

/// The user as reported by the hosting messaging app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostIdentity {
    #[serde(rename = "user_id")]
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub language_code: String,
    pub is_premium: bool,
}

/// Records that the dashboard was opened inside the host app. Failures are
/// logged and swallowed.
pub async fn track_miniapp_access<T: Transport>(
    client: &ApiClient<T>,
    identity: &HostIdentity,
    init_data: &str,
) {
    let mut body = match serde_json::to_value(identity) {
        Ok(body) => body,
        Err(err) => {
            warn!("Failed to track mini app access: {err}");
            return;
        }
    };
    if let Value::Object(fields) = &mut body {
        fields.insert("init_data".into(), json!(init_data));
        fields.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        fields.insert("platform".into(), json!("mini_app"));
    }

    match client.post_json::<Value, _>("/api/track-miniapp-access", &[], &body).await {
        Ok(reply) => debug!("Mini app access tracked: {reply}"),
        Err(err) => warn!("Failed to track mini app access: {err}"),
    }
}
