//! Ticketing client
//!
//! [`TicketingClient`] composes the token store, the user cache and the
//! request executor into the operations the bridge exposes: user resolution,
//! ticket listings (plain, role-scoped and status-scoped), single ticket
//! reads, ticket creation and update, and a handful of entity passthroughs.

pub mod executor;
pub mod fields;
pub mod query;

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::auth::TokenStore;
use crate::cache::user::normalize_email;
use crate::cache::{CacheLookup, UserCache};
use crate::error::{BridgeError, Result};
use crate::transport::Method;

pub use executor::{OperationKind, RequestExecutor, RetryPolicy};
pub use fields::FieldMapper;
pub use query::{Filter, Role, SortDirection, TicketQuery, TicketStatus};

const QUERY_ENDPOINT: &str = "GetEntityListByQuery";

/// One page of a listing
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TicketPage {
    pub data: Vec<Value>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl TicketPage {
    fn from_response(response: &Value, page: u32, page_size: u32) -> Self {
        let data = response
            .get("Data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let total = response
            .get("Total")
            .and_then(Value::as_u64)
            .unwrap_or(data.len() as u64);
        Self {
            data,
            total,
            page,
            page_size,
        }
    }
}

/// Outcome of pre-loading users into the cache
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct WarmReport {
    pub warmed: usize,
    pub already_cached: usize,
    pub failed: Vec<String>,
}

/// Domain operations against the ticketing API
pub struct TicketingClient {
    executor: RequestExecutor,
    tokens: Arc<TokenStore>,
    users: Arc<UserCache>,
    fields: FieldMapper,
}

impl TicketingClient {
    pub fn new(executor: RequestExecutor, tokens: Arc<TokenStore>, users: Arc<UserCache>) -> Self {
        Self {
            executor,
            tokens,
            users,
            fields: FieldMapper::new(),
        }
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn users(&self) -> &Arc<UserCache> {
        &self.users
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Resolve a user record by email, consulting the cache first.
    pub async fn get_user_by_email(&self, email: &str) -> Result<Value> {
        let key = normalize_email(email);
        if key.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "email address required".to_string(),
            ));
        }

        match self.users.lookup(&key) {
            CacheLookup::Hit(user) => return Ok(user),
            CacheLookup::KnownMissing => {
                return Err(BridgeError::NotFound(format!("user {}", key)));
            }
            CacheLookup::Miss => {}
        }

        debug!("Looking up user {}", key);
        let filters = Filter::Group {
            logic: "and",
            filters: vec![Filter::eq("Email", key.as_str())],
        };
        let response = self
            .executor
            .execute(
                Method::Post,
                QUERY_ENDPOINT,
                Some(json!({
                    "EntityType": "Person",
                    "Page": 1,
                    "PageSize": 1,
                    "Filters": filters.to_json(),
                })),
            )
            .await?;

        let user = response
            .get("Data")
            .and_then(Value::as_array)
            .and_then(|users| users.first())
            .cloned();

        match user {
            Some(user) => {
                self.users.put(&key, user.clone());
                Ok(user)
            }
            None => {
                self.users.put_missing(&key);
                Err(BridgeError::NotFound(format!("user {}", key)))
            }
        }
    }

    /// Numeric ID of the user with `email`
    pub async fn user_id_for(&self, email: &str) -> Result<i64> {
        let user = self.get_user_by_email(email).await?;
        user.get("Id").and_then(Value::as_i64).ok_or_else(|| {
            BridgeError::Decode(format!("user record for {} has no numeric Id", email))
        })
    }

    /// List IT tickets.
    pub async fn get_tickets(&self, query: &TicketQuery) -> Result<TicketPage> {
        self.list_tickets(query, &[]).await
    }

    /// List tickets the user reported (`Customer`) or is assigned to (`Agent`).
    pub async fn get_tickets_by_role(
        &self,
        email: &str,
        role: Role,
        query: &TicketQuery,
    ) -> Result<TicketPage> {
        let user_id = self.user_id_for(email).await?;
        info!("Listing tickets for user {} as {}", user_id, role);
        self.list_tickets(query, &[Filter::eq(role.field(), user_id)])
            .await
    }

    pub async fn get_tickets_by_status(
        &self,
        status: TicketStatus,
        query: &TicketQuery,
    ) -> Result<TicketPage> {
        self.list_tickets(
            query,
            &[Filter::any_of("BaseEntityStatus.Id", status.status_ids())],
        )
        .await
    }

    async fn list_tickets(&self, query: &TicketQuery, extra: &[Filter]) -> Result<TicketPage> {
        let response = self
            .executor
            .execute(Method::Post, QUERY_ENDPOINT, Some(query.to_payload(extra)))
            .await?;
        Ok(TicketPage::from_response(
            &response,
            query.page,
            query.page_size,
        ))
    }

    pub async fn get_ticket_by_id(&self, id: i64) -> Result<Value> {
        let response = self
            .executor
            .execute(
                Method::Post,
                "GetEntityById",
                Some(json!({"EntityType": "Ticket", "Id": id})),
            )
            .await?;

        match result_of(response) {
            Value::Null => Err(BridgeError::NotFound(format!("ticket {}", id))),
            ticket => Ok(ticket),
        }
    }

    /// Create a ticket from simplified fields.
    ///
    /// With a `user_email`, the resolved user becomes the ticket's end user
    /// (`Customer`) or agent (`Agent`).
    pub async fn create_ticket(
        &self,
        data: &Value,
        user_email: Option<&str>,
        role: Role,
    ) -> Result<Value> {
        let data = as_object(data, "ticket data")?;
        let mut mapped = self.fields.map_fields(&self.executor, data).await?;
        FieldMapper::apply_creation_defaults(&mut mapped);
        mapped
            .entry("EntityType")
            .or_insert_with(|| json!("Ticket"));
        self.assign_user(&mut mapped, user_email, role).await?;

        info!("Creating ticket");
        let response = self
            .executor
            .execute_with(
                OperationKind::Mutation,
                Method::Post,
                "CreateEntity",
                Some(Value::Object(mapped)),
            )
            .await?;
        Ok(result_of(response))
    }

    pub async fn update_ticket(
        &self,
        id: i64,
        updates: &Value,
        user_email: Option<&str>,
        role: Role,
    ) -> Result<Value> {
        let updates = as_object(updates, "ticket updates")?;
        let mut mapped = self.fields.map_fields(&self.executor, updates).await?;
        mapped.insert("EntityType".to_string(), json!("Ticket"));
        mapped.insert("Id".to_string(), json!(id));
        self.assign_user(&mut mapped, user_email, role).await?;

        info!("Updating ticket {}", id);
        let response = self
            .executor
            .execute_with(
                OperationKind::Mutation,
                Method::Post,
                "UpdateEntity",
                Some(Value::Object(mapped)),
            )
            .await?;
        Ok(result_of(response))
    }

    async fn assign_user(
        &self,
        mapped: &mut Map<String, Value>,
        user_email: Option<&str>,
        role: Role,
    ) -> Result<()> {
        if let Some(email) = user_email {
            let user_id = self.user_id_for(email).await?;
            mapped.insert(role.field().to_string(), json!(user_id));
        }
        Ok(())
    }

    /// Free-text search within one entity type
    pub async fn search_entities(
        &self,
        entity_type: &str,
        text: &str,
        page: u32,
        page_size: u32,
    ) -> Result<TicketPage> {
        let response = self
            .executor
            .execute(
                Method::Post,
                QUERY_ENDPOINT,
                Some(json!({
                    "EntityType": entity_type,
                    "SearchText": text,
                    "Page": page,
                    "PageSize": page_size,
                })),
            )
            .await?;
        Ok(TicketPage::from_response(&response, page, page_size))
    }

    pub async fn get_entity_types(&self) -> Result<Value> {
        self.executor
            .execute(Method::Get, "GetEntityTypes", None)
            .await
    }

    pub async fn get_entity_metadata(&self, entity_type: &str) -> Result<Value> {
        self.executor
            .execute(
                Method::Post,
                "GetEntityTypeInfo",
                Some(json!({"EntityType": entity_type})),
            )
            .await
    }

    pub async fn get_attachments(&self, entity_type: &str, id: i64) -> Result<Value> {
        self.executor
            .execute(
                Method::Post,
                "GetEntityAttachments",
                Some(json!({"EntityType": entity_type, "Id": id})),
            )
            .await
    }

    /// Resolve `emails` so later lookups are served from the cache.
    pub async fn warm_user_cache(&self, emails: &[String]) -> WarmReport {
        let mut report = WarmReport::default();

        for email in emails {
            if matches!(self.users.lookup(email), CacheLookup::Hit(_)) {
                report.already_cached += 1;
                continue;
            }
            match self.get_user_by_email(email).await {
                Ok(_) => report.warmed += 1,
                Err(e) => {
                    warn!("Could not warm cache for {}: {}", email, e);
                    report.failed.push(email.clone());
                }
            }
        }

        info!(
            "User cache warmed: {} loaded, {} already cached, {} failed",
            report.warmed,
            report.already_cached,
            report.failed.len()
        );
        report
    }
}

/// `Result` field of a response, or the whole response if absent
fn result_of(response: Value) -> Value {
    match response {
        Value::Object(mut fields) if fields.contains_key("Result") => {
            fields.remove("Result").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| BridgeError::InvalidArgument(format!("{} must be an object", what)))
}
