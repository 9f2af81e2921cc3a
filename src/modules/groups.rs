use std::sync::Arc;

use derive_more::with_trait::Display;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::modules::error::{Error, Result};
use crate::modules::notify::Confirm;
use crate::modules::transport::{ApiClient, Transport};
use crate::modules::types::null_as_default;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Display)]
#[serde(default)]
#[display("{group_title} ({group_id})")]
pub struct ManagedGroup {
    pub group_id: i64,
    pub group_title: String,
    pub is_owner: bool,
    pub bot_is_admin: bool,
    pub member_count: u64,
    pub filters_count: u64,
    pub warns_limit: u64,
    pub bans_count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ManagedResponse {
    success: bool,
    groups: Vec<ManagedGroup>,
    filtered_by_user: bool,
    error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagedGroups {
    pub groups: Vec<ManagedGroup>,
    pub filtered_by_user: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisabledCommands {
    pub disabled_commands: Vec<String>,
    /// Every non-admin command is off, not just the listed ones.
    #[serde(deserialize_with = "null_as_default")]
    pub disable_user_commands: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Display)]
#[serde(default)]
#[display("{fed_name} ({fed_id})")]
pub struct Federation {
    pub fed_id: String,
    pub fed_name: String,
    pub owner_id: Option<i64>,
    pub groups: Vec<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub banned_users_count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FederationResponse {
    success: bool,
    in_federation: bool,
    federation: Option<Federation>,
}

/// A per-group settings object that is read and written as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Section {
    #[display("locks")]
    Locks,
    #[display("cleanservice")]
    CleanService,
    #[display("cleanmessage")]
    CleanMessage,
}

impl Section {
    /// Key holding the object in both the GET reply and the POST body.
    fn field(self) -> &'static str {
        match self {
            Section::Locks => "locks",
            Section::CleanService => "clean_service",
            Section::CleanMessage => "clean_message",
        }
    }

    /// Keys written for one logical toggle. Clean-service toggles also set
    /// their legacy names.
    fn keys(self, key: &str) -> Vec<String> {
        let legacy = match (self, key) {
            (Section::CleanService, "pin") => Some("clean_pinned"),
            (Section::CleanService, "join") => Some("clean_join"),
            (Section::CleanService, "leave") => Some("clean_leave"),
            _ => None,
        };
        std::iter::once(key.to_string())
            .chain(legacy.map(str::to_string))
            .collect()
    }
}

pub struct GroupConfigClient<T> {
    client: Arc<ApiClient<T>>,
    admin_id: i64,
}

impl<T: Transport> GroupConfigClient<T> {
    pub fn new(client: Arc<ApiClient<T>>, admin_id: i64) -> Self {
        Self { client, admin_id }
    }

    /// Groups the bot administers, restricted to `user_id`'s when given.
    pub async fn managed_groups(&self, user_id: Option<i64>) -> Result<ManagedGroups> {
        let query: Vec<(&str, String)> = user_id
            .map(|id| vec![("user_id", id.to_string())])
            .unwrap_or_default();
        let response: ManagedResponse = self.client.get_json("/api/groups/managed", &query).await?;
        if !response.success {
            return Err(Error::Application(
                response.error.unwrap_or_else(|| "Failed to load groups".to_string()),
            ));
        }
        debug!("{} managed groups (filtered: {})", response.groups.len(), response.filtered_by_user);
        Ok(ManagedGroups {
            groups: response.groups,
            filtered_by_user: response.filtered_by_user,
        })
    }

    pub async fn config(&self, group_id: i64) -> Result<Value> {
        let reply = self
            .client
            .get_value(&format!("/api/group/{group_id}/config"), &[])
            .await?;
        unwrap_success(reply, "config", "Failed to load group settings")
    }

    pub async fn section(&self, group_id: i64, section: Section) -> Result<Map<String, Value>> {
        let reply = self
            .client
            .get_value(&format!("/api/group/{group_id}/{section}"), &[])
            .await?;
        match unwrap_success(reply, section.field(), "Failed to get current settings")? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(Error::Decode(format!("{section} is not an object: {other}"))),
        }
    }

    /// Reads the section, changes one key and writes the whole object back.
    pub async fn update_field(
        &self,
        group_id: i64,
        section: Section,
        key: &str,
        value: Value,
    ) -> Result<Map<String, Value>> {
        let mut current = self.section(group_id, section).await?;
        for name in section.keys(key) {
            current.insert(name, value.clone());
        }
        if section == Section::CleanService && key == "enabled" {
            current.insert("all".to_string(), value.clone());
        }

        let mut body = Map::new();
        body.insert("admin_id".to_string(), json!(self.admin_id));
        body.insert(section.field().to_string(), Value::Object(current.clone()));
        let reply: Value = self
            .client
            .post_json(
                &format!("/api/group/{group_id}/{section}"),
                &[("admin_id", self.admin_id.to_string())],
                &Value::Object(body),
            )
            .await?;
        check_success(&reply, "Failed to update setting")?;
        info!("Group {group_id}: {section}.{key} = {value}");
        Ok(current)
    }

    /// Sets one general setting. Returns the stored config when the backend sends it.
    pub async fn update_settings(&self, group_id: i64, key: &str, value: Value) -> Result<Option<Value>> {
        let mut settings = Map::new();
        settings.insert(key.to_string(), value);
        let body = json!({"admin_id": self.admin_id, "settings": settings});
        let reply: Value = self
            .client
            .post_json(&format!("/api/group/{group_id}/settings"), &[], &body)
            .await?;
        check_success(&reply, "Failed to update setting")?;
        Ok(reply.get("config").cloned())
    }

    pub async fn add_filter(&self, group_id: i64, trigger: &str, response: &str) -> Result<()> {
        let (trigger, response) = (trigger.trim(), response.trim());
        if trigger.is_empty() || response.is_empty() {
            return Err(Error::Validation("Please fill in both trigger and response".into()));
        }
        let body = json!({"admin_id": self.admin_id, "trigger": trigger, "response": response});
        let reply: Value = self
            .client
            .post_json(&format!("/api/group/{group_id}/filters"), &[], &body)
            .await?;
        check_success(&reply, "Failed to add filter")?;
        info!("Group {group_id}: filter '{trigger}' added");
        Ok(())
    }

    /// Returns `false` when the operator declines.
    pub async fn remove_filter(&self, group_id: i64, trigger: &str, confirm: &dyn Confirm) -> Result<bool> {
        if !confirm.confirm(&format!("Remove filter for \"{trigger}\"?")) {
            return Ok(false);
        }
        self.delete(&format!("/api/group/{group_id}/filters"), trigger, &[], "Failed to remove filter")
            .await?;
        info!("Group {group_id}: filter '{trigger}' removed");
        Ok(true)
    }

    pub async fn block_word(&self, group_id: i64, word: &str) -> Result<()> {
        let word = word.trim();
        if word.is_empty() {
            return Err(Error::Validation("Please enter a word to block".into()));
        }
        let body = json!({"admin_id": self.admin_id, "word": word});
        let reply: Value = self
            .client
            .post_json(&format!("/api/group/{group_id}/blocklist"), &[], &body)
            .await?;
        check_success(&reply, "Failed to add word")?;
        info!("Group {group_id}: '{word}' blocked");
        Ok(())
    }

    pub async fn unblock_word(&self, group_id: i64, word: &str, confirm: &dyn Confirm) -> Result<bool> {
        if !confirm.confirm(&format!("Remove blocked word \"{word}\"?")) {
            return Ok(false);
        }
        self.delete(&format!("/api/group/{group_id}/blocklist"), word, &[], "Failed to remove word")
            .await?;
        info!("Group {group_id}: '{word}' unblocked");
        Ok(true)
    }

    pub async fn disabled_commands(&self, group_id: i64) -> Result<DisabledCommands> {
        let reply = self
            .client
            .get_value(&format!("/api/group/{group_id}/disabled-commands"), &[])
            .await?;
        check_success(&reply, "Failed to load disabled commands")?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Disables `/command` for non-admins. A leading slash and case are ignored.
    pub async fn disable_command(&self, group_id: i64, command: &str) -> Result<String> {
        let command = command.trim().to_lowercase().replacen('/', "", 1);
        if command.is_empty() {
            return Err(Error::Validation("Please enter a command name".into()));
        }
        let body = json!({"admin_id": self.admin_id, "command": command});
        let reply: Value = self
            .client
            .post_json(
                &format!("/api/group/{group_id}/disabled-commands"),
                &[("admin_id", self.admin_id.to_string())],
                &body,
            )
            .await?;
        check_success(&reply, "Failed to disable command")?;
        info!("Group {group_id}: /{command} disabled");
        Ok(command)
    }

    pub async fn enable_command(&self, group_id: i64, command: &str, confirm: &dyn Confirm) -> Result<bool> {
        if !confirm.confirm(&format!("Enable command \"/{command}\"?")) {
            return Ok(false);
        }
        self.delete(
            &format!("/api/group/{group_id}/disabled-commands"),
            command,
            &[("admin_id", self.admin_id.to_string())],
            "Failed to enable command",
        )
        .await?;
        info!("Group {group_id}: /{command} enabled");
        Ok(true)
    }

    /// The group's federation, `None` when it is not in one.
    pub async fn federation(&self, group_id: i64) -> Result<Option<Federation>> {
        let response: FederationResponse = self
            .client
            .get_json(&format!("/api/group/{group_id}/federation"), &[])
            .await?;
        if !response.success || !response.in_federation {
            return Ok(None);
        }
        Ok(Some(response.federation.unwrap_or_default()))
    }

    /// Creates a federation with this group as its first member. Returns the new federation id.
    pub async fn create_federation(&self, group_id: i64, name: &str) -> Result<Option<String>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("Please provide a federation name".into()));
        }
        let body = json!({"admin_id": self.admin_id, "fed_name": name});
        let reply: Value = self
            .client
            .post_json(&format!("/api/group/{group_id}/federation/create"), &[], &body)
            .await?;
        check_success(&reply, "Unknown")?;
        let fed_id = reply.get("fed_id").and_then(Value::as_str).map(str::to_string);
        info!("Group {group_id}: federation '{name}' created");
        Ok(fed_id)
    }

    pub async fn join_federation(&self, group_id: i64, fed_id: &str) -> Result<()> {
        let fed_id = fed_id.trim();
        if fed_id.is_empty() {
            return Err(Error::Validation("Please provide a federation ID to join".into()));
        }
        let body = json!({"admin_id": self.admin_id, "fed_id": fed_id});
        let reply: Value = self
            .client
            .post_json(&format!("/api/group/{group_id}/federation/join"), &[], &body)
            .await?;
        check_success(&reply, "Unknown")?;
        info!("Group {group_id}: joined federation {fed_id}");
        Ok(())
    }

    pub async fn leave_federation(&self, group_id: i64, confirm: &dyn Confirm) -> Result<bool> {
        if !confirm.confirm("Are you sure you want this group to leave its federation?") {
            return Ok(false);
        }
        let body = json!({"admin_id": self.admin_id});
        let reply: Value = self
            .client
            .post_json(&format!("/api/group/{group_id}/federation/leave"), &[], &body)
            .await?;
        check_success(&reply, "Unknown")?;
        info!("Group {group_id}: left its federation");
        Ok(true)
    }

    async fn delete(&self, path: &str, key: &str, query: &[(&str, String)], fallback: &str) -> Result<()> {
        let body = json!({"admin_id": self.admin_id});
        let reply: Value = self.client.delete_json(path, key, query, &body).await?;
        check_success(&reply, fallback)
    }
}

fn check_success(reply: &Value, fallback: &str) -> Result<()> {
    if reply.get("success").and_then(Value::as_bool).unwrap_or(false) {
        Ok(())
    } else {
        let error = reply
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or(fallback);
        Err(Error::Application(error.to_string()))
    }
}

fn unwrap_success(mut reply: Value, field: &str, fallback: &str) -> Result<Value> {
    check_success(&reply, fallback)?;
    Ok(reply.get_mut(field).map(Value::take).unwrap_or(Value::Null))
}
