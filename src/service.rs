//! Inbound request surface.
//!
//! Every operation takes a JSON argument object and answers with an
//! [`Envelope`]: `{"success": true, "data": ...}` or
//! `{"success": false, "error": ..., "kind": ...}`. List results carry a
//! `pagination` block.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::auth::TokenPrewarmer;
use crate::client::query::DEFAULT_PAGE_SIZE;
use crate::client::{Role, TicketPage, TicketQuery, TicketStatus, TicketingClient};
use crate::error::{BridgeError, Result};

pub const SERVICE_NAME: &str = "ticketing-bridge";

/// An inbound call
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Caller-chosen correlation ID, echoed in the envelope
    #[serde(default)]
    pub id: Option<Value>,
    /// Operation name
    pub op: String,
    #[serde(default)]
    pub args: Value,
}

impl Request {
    pub fn new(op: impl Into<String>, args: Value) -> Self {
        Self {
            id: None,
            op: op.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
}

/// Uniform response to every operation
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error kind, see [`BridgeError::kind`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Echo of the scope of a filtered listing (`user_role`, `status`, ...)
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn page(page: TicketPage) -> Self {
        Self {
            success: true,
            pagination: Some(Pagination {
                page: page.page,
                page_size: page.page_size,
                total_count: page.total,
            }),
            data: Some(Value::Array(page.data)),
            ..Default::default()
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn failure(err: &BridgeError) -> Self {
        Self {
            success: false,
            error: Some(err.detail()),
            kind: Some(err.kind().to_string()),
            ..Default::default()
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// Routes inbound operations to the ticketing client and diagnostics
pub struct BridgeService {
    client: Arc<TicketingClient>,
    prewarmer: TokenPrewarmer,
}

impl BridgeService {
    pub fn new(client: Arc<TicketingClient>, prewarmer: TokenPrewarmer) -> Self {
        Self { client, prewarmer }
    }

    pub fn client(&self) -> &Arc<TicketingClient> {
        &self.client
    }

    pub fn prewarmer(&self) -> &TokenPrewarmer {
        &self.prewarmer
    }

    /// Run one request. Never fails; errors become failure envelopes.
    pub async fn dispatch(&self, request: Request) -> Envelope {
        let Request { id, op, args } = request;
        debug!("Dispatching {}", op);

        let mut envelope = match self.handle(&op, &args).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("{} failed: {}", op, e);
                Envelope::failure(&e)
            }
        };
        envelope.id = id;
        envelope
    }

    async fn handle(&self, op: &str, args: &Value) -> Result<Envelope> {
        match op {
            "get_user_by_email" => {
                let email = required_str(args, "email")?;
                Ok(Envelope::ok(self.client.get_user_by_email(email).await?))
            }
            "get_tickets" => {
                let query = TicketQuery::from_args(args)?;
                Ok(Envelope::page(self.client.get_tickets(&query).await?))
            }
            "get_tickets_by_role" => {
                let email = required_str(args, "user_email")?;
                let role = role_arg(args, Role::Customer)?;
                let query = TicketQuery::from_args(args)?;
                let page = self.client.get_tickets_by_role(email, role, &query).await?;
                Ok(Envelope::page(page)
                    .with_context("user_role", role.as_str())
                    .with_context("user_email", email))
            }
            "get_tickets_by_status" => {
                let status = match optional_str(args, "status") {
                    Some(status) => status.parse()?,
                    None => TicketStatus::Open,
                };
                let query = TicketQuery::from_args(args)?;
                let page = self.client.get_tickets_by_status(status, &query).await?;
                Ok(Envelope::page(page).with_context("status", status.as_str()))
            }
            "get_ticket_by_id" => {
                let id = id_arg(args, "ticket_id")?;
                Ok(Envelope::ok(self.client.get_ticket_by_id(id).await?))
            }
            "create_ticket" => {
                let data = match args.get("ticket_data") {
                    Some(data) => data.clone(),
                    None => without(args, &["user_email", "role"]),
                };
                let role = role_arg(args, Role::Customer)?;
                let created = self
                    .client
                    .create_ticket(&data, optional_str(args, "user_email"), role)
                    .await?;
                Ok(Envelope::ok(created).with_message("Ticket created successfully"))
            }
            "update_ticket" => {
                let id = id_arg(args, "ticket_id")?;
                let updates = args.get("updates").ok_or_else(|| missing("updates"))?;
                let role = role_arg(args, Role::Agent)?;
                let updated = self
                    .client
                    .update_ticket(id, updates, optional_str(args, "user_email"), role)
                    .await?;
                Ok(Envelope::ok(updated).with_message(format!("Ticket {} updated successfully", id)))
            }
            "search_entities" => {
                let entity_type = optional_str(args, "entity_type").unwrap_or("Ticket");
                let text = required_str(args, "query")?;
                let page = match args.get("page") {
                    Some(v) => positive(v, "page")?,
                    None => 1,
                };
                let page_size = match args.get("page_size") {
                    Some(v) => positive(v, "page_size")?,
                    None => DEFAULT_PAGE_SIZE,
                };
                let found = self
                    .client
                    .search_entities(entity_type, text, page, page_size)
                    .await?;
                Ok(Envelope::page(found).with_context("entity_type", entity_type))
            }
            "get_entity_types" => Ok(Envelope::ok(self.client.get_entity_types().await?)),
            "get_entity_metadata" => {
                let entity_type = required_str(args, "entity_type")?;
                Ok(Envelope::ok(
                    self.client.get_entity_metadata(entity_type).await?,
                ))
            }
            "get_attachments" => {
                let entity_type = optional_str(args, "entity_type").unwrap_or("Ticket");
                let id = id_arg(args, "entity_id")?;
                Ok(Envelope::ok(
                    self.client.get_attachments(entity_type, id).await?,
                ))
            }

            "health" => {
                let token = self.client.tokens().info();
                Ok(Envelope::ok(json!({
                    "status": "healthy",
                    "service": SERVICE_NAME,
                    "authenticated": token.has_token && !token.is_expired,
                    "token_info": to_value(&token)?,
                })))
            }
            "cache_stats" => Ok(Envelope::ok(to_value(&self.client.users().stats())?)),
            "cache_clear" => {
                self.client.users().clear();
                Ok(Envelope::done("User cache cleared"))
            }
            "cache_warm" => {
                let emails = string_list(args, "emails")?;
                let report = self.client.warm_user_cache(&emails).await;
                Ok(Envelope::ok(to_value(&report)?))
            }
            "prewarming_status" => Ok(Envelope::ok(to_value(&self.prewarmer.status())?)),
            "prewarming_start" => {
                if self.prewarmer.start().await {
                    Ok(Envelope::done("Token pre-warming started"))
                } else {
                    Err(BridgeError::Auth(
                        "token pre-warming could not obtain a token".to_string(),
                    ))
                }
            }
            "prewarming_stop" => {
                self.prewarmer.stop();
                Ok(Envelope::done("Token pre-warming stopped"))
            }
            "prewarming_refresh" => {
                self.prewarmer.force_refresh()?;
                Ok(Envelope::done("Token refresh triggered"))
            }
            "token_status" => Ok(Envelope::ok(to_value(&self.client.tokens().info())?)),
            "token_refresh" => {
                let tokens = self.client.tokens();
                if tokens.authenticate().await? {
                    Ok(Envelope::ok(to_value(&tokens.info())?)
                        .with_message("Token refreshed successfully"))
                } else {
                    Err(BridgeError::Auth("Failed to refresh token".to_string()))
                }
            }

            other => Err(BridgeError::InvalidArgument(format!(
                "unknown operation '{}'",
                other
            ))),
        }
    }
}

fn missing(name: &str) -> BridgeError {
    BridgeError::InvalidArgument(format!("missing required argument '{}'", name))
}

fn optional_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    optional_str(args, name).ok_or_else(|| missing(name))
}

fn role_arg(args: &Value, default: Role) -> Result<Role> {
    match optional_str(args, "role") {
        Some(role) => role.parse(),
        None => Ok(default),
    }
}

/// Entity ID given as a number or a numeric string, under `name` or `id`
fn id_arg(args: &Value, name: &str) -> Result<i64> {
    let value = args
        .get(name)
        .or_else(|| args.get("id"))
        .ok_or_else(|| missing(name))?;
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| BridgeError::InvalidArgument(format!("{} must be an integer", name)))
}

fn positive(value: &Value, name: &str) -> Result<u32> {
    value
        .as_u64()
        .filter(|n| *n >= 1)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| BridgeError::InvalidArgument(format!("{} must be a positive integer", name)))
}

fn string_list(args: &Value, name: &str) -> Result<Vec<String>> {
    let items = args
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| missing(name))?;
    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

/// `args` with the given keys removed
fn without(args: &Value, keys: &[&str]) -> Value {
    match args {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter(|(k, _)| !keys.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| BridgeError::Decode(e.to_string()))
}
