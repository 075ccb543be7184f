use crate::config::DiscordConfig;
use crate::error::{ReconcileError, Result};
use crate::model::{EventStatus, Snowflake};
use crate::remote::{
    GuildApi, MemberEdit, OutboundMessage, RemoteBan, RemoteMember, RemoteScheduledEvent,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

/// Maximum buttons Discord accepts in one action row.
const BUTTONS_PER_ROW: usize = 5;

/// [`GuildApi`] backed by the Discord REST API.
pub struct DiscordRestClient {
    bot_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl DiscordRestClient {
    /// Build a client from config, resolving the token from the environment if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if no token is configured or the HTTP client cannot be built.
    pub fn from_config(config: &DiscordConfig) -> Result<Self> {
        let token = config.resolved_token()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .user_agent(concat!(
                "DiscordBot (https://github.com/guildkeeper, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .build()?;
        Ok(Self::with_client(token, &config.api_base_url, client))
    }

    pub fn with_client(
        bot_token: impl Into<String>,
        base_url: &str,
        client: reqwest::Client,
    ) -> Self {
        Self {
            bot_token: bot_token.into(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("Bot {}", self.bot_token))
    }

    async fn ensure_success(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ReconcileError::Remote {
            operation,
            status: status.as_u16(),
            body,
        })
    }

    /// GET that maps a 404 to `None`.
    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
    ) -> Result<Option<T>> {
        let response = self
            .authorized(self.client.get(self.url(path)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::ensure_success(operation, response).await?;
        Ok(Some(response.json().await?))
    }
}

fn message_payload(message: &OutboundMessage) -> serde_json::Value {
    let mut body = json!({
        "content": message.content,
        "allowed_mentions": {
            "parse": ["users"],
            "roles": message.mention_roles,
        },
    });

    if let Some(embed) = &message.embed {
        body["embeds"] = json!([embed]);
    }

    if !message.buttons.is_empty() {
        let rows: Vec<serde_json::Value> = message
            .buttons
            .chunks(BUTTONS_PER_ROW)
            .map(|row| {
                let buttons: Vec<serde_json::Value> = row
                    .iter()
                    .map(|button| match (&button.custom_id, &button.url) {
                        (_, Some(url)) => json!({
                            "type": 2,
                            "style": 5,
                            "label": button.label,
                            "url": url,
                        }),
                        (custom_id, None) => json!({
                            "type": 2,
                            "style": 1,
                            "label": button.label,
                            "custom_id": custom_id.clone().unwrap_or_default(),
                        }),
                    })
                    .collect();
                json!({"type": 1, "components": buttons})
            })
            .collect();
        body["components"] = json!(rows);
    }

    body
}

#[async_trait]
impl GuildApi for DiscordRestClient {
    async fn list_scheduled_events(
        &self,
        guild_id: Snowflake,
    ) -> Result<Vec<RemoteScheduledEvent>> {
        let response = self
            .authorized(
                self.client
                    .get(self.url(&format!("/guilds/{guild_id}/scheduled-events"))),
            )
            .send()
            .await?;
        let response = Self::ensure_success("list_scheduled_events", response).await?;
        Ok(response.json().await?)
    }

    async fn set_scheduled_event_status(
        &self,
        guild_id: Snowflake,
        event_id: Snowflake,
        status: EventStatus,
    ) -> Result<()> {
        let response = self
            .authorized(self.client.patch(
                self.url(&format!("/guilds/{guild_id}/scheduled-events/{event_id}")),
            ))
            .json(&json!({"status": status.wire_value()}))
            .send()
            .await?;
        Self::ensure_success("set_scheduled_event_status", response).await?;
        Ok(())
    }

    async fn get_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<Option<RemoteMember>> {
        self.get_optional("get_member", &format!("/guilds/{guild_id}/members/{user_id}"))
            .await
    }

    async fn modify_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        edit: &MemberEdit,
    ) -> Result<()> {
        let response = self
            .authorized(
                self.client
                    .patch(self.url(&format!("/guilds/{guild_id}/members/{user_id}"))),
            )
            .json(edit)
            .send()
            .await?;
        Self::ensure_success("modify_member", response).await?;
        Ok(())
    }

    async fn add_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> Result<()> {
        let response = self
            .authorized(self.client.put(self.url(&format!(
                "/guilds/{guild_id}/members/{user_id}/roles/{role_id}"
            ))))
            .send()
            .await?;
        Self::ensure_success("add_member_role", response).await?;
        Ok(())
    }

    async fn get_ban(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<Option<RemoteBan>> {
        self.get_optional("get_ban", &format!("/guilds/{guild_id}/bans/{user_id}"))
            .await
    }

    async fn remove_ban(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        reason: &str,
    ) -> Result<()> {
        let mut request = self.authorized(
            self.client
                .delete(self.url(&format!("/guilds/{guild_id}/bans/{user_id}"))),
        );
        // Header values must be visible ASCII; drop reasons that are not.
        if let Ok(value) = reqwest::header::HeaderValue::from_str(reason) {
            request = request.header("X-Audit-Log-Reason", value);
        }
        let response = request.send().await?;
        Self::ensure_success("remove_ban", response).await?;
        Ok(())
    }

    async fn create_message(&self, channel_id: Snowflake, message: &OutboundMessage) -> Result<()> {
        let response = self
            .authorized(
                self.client
                    .post(self.url(&format!("/channels/{channel_id}/messages"))),
            )
            .json(&message_payload(message))
            .send()
            .await?;
        Self::ensure_success("create_message", response).await?;
        Ok(())
    }
}
