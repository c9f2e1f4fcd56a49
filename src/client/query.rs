//! Ticket list queries and their JSON payloads.

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::{BridgeError, Result};

/// Entity type IDs of IT tickets
pub const TICKET_TYPE_IT_REQUEST: u64 = 112;
pub const TICKET_TYPE_SERVICE_ORDER: u64 = 113;
pub const TICKET_TYPE_INCIDENT: u64 = 281;

pub const IT_TICKET_TYPES: [u64; 3] = [
    TICKET_TYPE_IT_REQUEST,
    TICKET_TYPE_SERVICE_ORDER,
    TICKET_TYPE_INCIDENT,
];

pub const OPEN_STATUS_IDS: [u64; 4] = [1, 3, 6, 9];
pub const CLOSED_STATUS_IDS: [u64; 2] = [10, 11];

pub const DEFAULT_PAGE_SIZE: u32 = 15;
pub const DEFAULT_SORT_FIELD: &str = "CreatedDate";

/// Resolve a ticket type display name or entity name to its numeric ID
pub fn ticket_type_id(name: &str) -> Option<u64> {
    match name.trim().to_lowercase().as_str() {
        "it request" | "it-ärende" | "ticket" => Some(TICKET_TYPE_IT_REQUEST),
        "service order" | "serviceorderrequest" => Some(TICKET_TYPE_SERVICE_ORDER),
        "incident management" | "incident" => Some(TICKET_TYPE_INCIDENT),
        _ => None,
    }
}

/// Whose tickets a role-scoped query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Tickets the user reported
    Customer,
    /// Tickets assigned to the user
    Agent,
}

impl Role {
    /// Ticket field holding the user's ID for this role
    pub fn field(self) -> &'static str {
        match self {
            Role::Customer => "BaseEndUser",
            Role::Agent => "BaseAgent",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Agent => "agent",
        }
    }
}

impl FromStr for Role {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "agent" => Ok(Role::Agent),
            other => Err(BridgeError::InvalidArgument(format!(
                "role must be 'customer' or 'agent', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Open,
    Closed,
}

impl TicketStatus {
    pub fn status_ids(self) -> &'static [u64] {
        match self {
            TicketStatus::Open => &OPEN_STATUS_IDS,
            TicketStatus::Closed => &CLOSED_STATUS_IDS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Closed => "closed",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(TicketStatus::Open),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(BridgeError::InvalidArgument(format!(
                "status must be 'open' or 'closed', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    fn as_str(self) -> &'static str {
        match self {
            SortDirection::Ascending => "Ascending",
            SortDirection::Descending => "Descending",
        }
    }
}

impl FromStr for SortDirection {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Ascending),
            "desc" | "descending" => Ok(SortDirection::Descending),
            other => Err(BridgeError::InvalidArgument(format!(
                "sort direction must be 'asc' or 'desc', got '{}'",
                other
            ))),
        }
    }
}

/// A node of the remote filter tree
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Condition {
        field: String,
        operator: String,
        value: Value,
    },
    Group {
        logic: &'static str,
        filters: Vec<Filter>,
    },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition {
            field: field.into(),
            operator: "eq".to_string(),
            value: value.into(),
        }
    }

    /// `field` equal to any of `values`
    pub fn any_of<V: Into<Value> + Copy>(field: &str, values: &[V]) -> Self {
        Filter::Group {
            logic: "or",
            filters: values.iter().map(|v| Filter::eq(field, *v)).collect(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Filter::Condition {
                field,
                operator,
                value,
            } => json!({"Field": field, "Operator": operator, "Value": value}),
            Filter::Group { logic, filters } => json!({
                "Logic": logic,
                "Filters": filters.iter().map(Filter::to_json).collect::<Vec<_>>(),
            }),
        }
    }
}

/// Paging, filtering and sorting of a ticket listing
#[derive(Debug, Clone, PartialEq)]
pub struct TicketQuery {
    pub page: u32,
    pub page_size: u32,
    pub filters: Vec<Filter>,
    pub sort_by: String,
    pub sort_direction: SortDirection,
    /// Names or numeric IDs; `None` selects every IT ticket type
    pub ticket_types: Option<Vec<Value>>,
}

impl Default for TicketQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            filters: Vec::new(),
            sort_by: DEFAULT_SORT_FIELD.to_string(),
            sort_direction: SortDirection::Descending,
            ticket_types: None,
        }
    }
}

impl TicketQuery {
    /// Build a query from call arguments
    /// (`page`, `page_size`, `filters`, `sort_by`, `sort_direction`, `ticket_types`).
    pub fn from_args(args: &Value) -> Result<Self> {
        let mut query = TicketQuery::default();

        if let Some(page) = args.get("page") {
            query.page = positive(page, "page")?;
        }
        if let Some(page_size) = args.get("page_size") {
            query.page_size = positive(page_size, "page_size")?;
        }
        if let Some(sort_by) = args.get("sort_by").and_then(Value::as_str) {
            query.sort_by = sort_by.to_string();
        }
        if let Some(direction) = args.get("sort_direction").and_then(Value::as_str) {
            query.sort_direction = direction.parse()?;
        }
        match args.get("ticket_types") {
            None | Some(Value::Null) => {}
            Some(Value::Array(types)) => query.ticket_types = Some(types.clone()),
            Some(single @ (Value::String(_) | Value::Number(_))) => {
                query.ticket_types = Some(vec![single.clone()])
            }
            Some(_) => {
                return Err(BridgeError::InvalidArgument(
                    "ticket_types must be a list of names or IDs".to_string(),
                ))
            }
        }
        if let Some(filters) = args.get("filters") {
            query.filters = parse_filters(filters)?;
        }

        Ok(query)
    }

    /// Numeric ticket type IDs selected by this query
    pub fn type_ids(&self) -> Vec<u64> {
        let Some(types) = &self.ticket_types else {
            return IT_TICKET_TYPES.to_vec();
        };

        let mut ids = Vec::new();
        for ticket_type in types {
            let id = match ticket_type {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse::<u64>().ok().or_else(|| ticket_type_id(s)),
                _ => None,
            };
            match id {
                Some(id) if !ids.contains(&id) => ids.push(id),
                Some(_) => {}
                None => warn!("Unknown ticket type {}, skipping", ticket_type),
            }
        }

        if ids.is_empty() {
            warn!("No known ticket types requested, using all IT ticket types");
            return IT_TICKET_TYPES.to_vec();
        }
        ids
    }

    /// `GetEntityListByQuery` payload for tickets, with `extra` filters
    /// combined with the query's own.
    pub fn to_payload(&self, extra: &[Filter]) -> Value {
        let mut filters: Vec<Filter> = extra.to_vec();
        filters.extend(self.filters.iter().cloned());
        filters.push(Filter::any_of("EntityType.Id", &self.type_ids()));
        let tree = Filter::Group {
            logic: "and",
            filters,
        };

        json!({
            "EntityType": "Ticket",
            "Page": self.page,
            "PageSize": self.page_size,
            "Filters": tree.to_json(),
            "Sort": [{"Field": self.sort_by, "Direction": self.sort_direction.as_str()}],
        })
    }
}

fn positive(value: &Value, name: &str) -> Result<u32> {
    value
        .as_u64()
        .filter(|n| *n >= 1 && *n <= u32::MAX as u64)
        .map(|n| n as u32)
        .ok_or_else(|| BridgeError::InvalidArgument(format!("{} must be a positive integer", name)))
}

/// Parse caller filters.
///
/// Accepts either an object mapping field names to a value (a list meaning
/// "any of") or a list of `{field, operator, value}` conditions.
pub fn parse_filters(filters: &Value) -> Result<Vec<Filter>> {
    match filters {
        Value::Null => Ok(Vec::new()),
        Value::Object(fields) => Ok(fields.iter().map(field_filter).collect()),
        Value::Array(conditions) => conditions.iter().map(condition).collect(),
        _ => Err(BridgeError::InvalidArgument(
            "filters must be an object or a list".to_string(),
        )),
    }
}

fn field_filter((field, value): (&String, &Value)) -> Filter {
    match value {
        Value::Array(values) => Filter::Group {
            logic: "or",
            filters: values.iter().map(|v| Filter::eq(field, v.clone())).collect(),
        },
        other => Filter::eq(field, other.clone()),
    }
}

fn condition(value: &Value) -> Result<Filter> {
    let object: &Map<String, Value> = value.as_object().ok_or_else(|| {
        BridgeError::InvalidArgument("filter conditions must be objects".to_string())
    })?;
    let lookup = |key: &str| {
        object
            .get(key)
            .or_else(|| object.get(&capitalize(key)))
    };

    let field = lookup("field")
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::InvalidArgument("filter condition needs a field".to_string()))?;
    let operator = lookup("operator")
        .and_then(Value::as_str)
        .unwrap_or("eq");
    let value = lookup("value").cloned().unwrap_or(Value::Null);

    Ok(Filter::Condition {
        field: field.to_string(),
        operator: operator.to_string(),
        value,
    })
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
