//! Translation of simplified ticket fields into remote field names and IDs.
//!
//! Callers describe tickets with `title`, `description`, `priority` and
//! `status`. Priority and status may be given as human names; those are
//! resolved against the remote `Priority` and `EntityStatus` entity lists,
//! which are fetched once and kept for the life of the mapper.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::executor::RequestExecutor;
use crate::error::Result;
use crate::transport::Method;

pub const DEFAULT_PRIORITY_ID: i64 = 7;
pub const DEFAULT_STATUS_ID: i64 = 1;

/// Largest enumeration list fetched per entity type
const LOOKUP_PAGE_SIZE: u32 = 100;

/// Record fields that may carry an enumeration value's name
const NAME_FIELDS: [&str; 4] = ["Name", "DisplayName", "Title", "BaseHeader"];

/// A mapped enumeration field
struct EnumField {
    target: &'static str,
    entity_type: &'static str,
    default_id: i64,
}

const PRIORITY: EnumField = EnumField {
    target: "PriorityId",
    entity_type: "Priority",
    default_id: DEFAULT_PRIORITY_ID,
};

const STATUS: EnumField = EnumField {
    target: "BaseEntityStatusId",
    entity_type: "EntityStatus",
    default_id: DEFAULT_STATUS_ID,
};

#[derive(Debug, Clone)]
struct EnumOption {
    id: i64,
    names: Vec<String>,
}

/// Maps simplified fields, caching enumeration lookups per entity type.
#[derive(Default)]
pub struct FieldMapper {
    lookups: DashMap<String, Arc<Vec<EnumOption>>>,
}

impl FieldMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `data` into remote fields. Unknown fields pass through unchanged.
    pub async fn map_fields(
        &self,
        executor: &RequestExecutor,
        data: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let mut mapped = Map::new();

        for (key, value) in data {
            match key.as_str() {
                "title" => {
                    mapped.insert("BaseHeader".to_string(), value.clone());
                }
                "description" => {
                    mapped.insert("BaseDescription".to_string(), value.clone());
                }
                "priority" => {
                    let id = self.resolve(executor, &PRIORITY, value).await;
                    mapped.insert(PRIORITY.target.to_string(), json!(id));
                }
                "status" => {
                    let id = self.resolve(executor, &STATUS, value).await;
                    mapped.insert(STATUS.target.to_string(), json!(id));
                }
                _ => {
                    mapped.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(mapped)
    }

    /// Fill in the priority and status a new ticket gets when none is given
    pub fn apply_creation_defaults(mapped: &mut Map<String, Value>) {
        mapped
            .entry(PRIORITY.target)
            .or_insert_with(|| json!(DEFAULT_PRIORITY_ID));
        mapped
            .entry(STATUS.target)
            .or_insert_with(|| json!(DEFAULT_STATUS_ID));
    }

    /// Number of entity types with a cached lookup
    pub fn cached_lookups(&self) -> usize {
        self.lookups.len()
    }

    async fn resolve(&self, executor: &RequestExecutor, field: &EnumField, value: &Value) -> i64 {
        let name = match value {
            Value::Number(n) => {
                if let Some(id) = n.as_i64() {
                    return id;
                }
                n.to_string()
            }
            Value::String(s) => {
                if let Ok(id) = s.trim().parse::<i64>() {
                    return id;
                }
                s.trim().to_string()
            }
            other => other.to_string(),
        };

        let options = match self.options(executor, field.entity_type).await {
            Ok(options) => options,
            Err(e) => {
                warn!(
                    "Could not load {} values ({}), using default {} for '{}'",
                    field.entity_type, e, field.default_id, name
                );
                return field.default_id;
            }
        };

        let wanted = name.to_lowercase();
        if let Some(option) = options
            .iter()
            .find(|o| o.names.iter().any(|n| n.to_lowercase() == wanted))
        {
            return option.id;
        }

        match options.first() {
            Some(first) => {
                warn!(
                    "Unknown {} '{}', using first available ({})",
                    field.entity_type, name, first.id
                );
                first.id
            }
            None => {
                warn!(
                    "No {} values available, using default {} for '{}'",
                    field.entity_type, field.default_id, name
                );
                field.default_id
            }
        }
    }

    async fn options(
        &self,
        executor: &RequestExecutor,
        entity_type: &str,
    ) -> Result<Arc<Vec<EnumOption>>> {
        if let Some(cached) = self.lookups.get(entity_type) {
            return Ok(Arc::clone(cached.value()));
        }

        let response = executor
            .execute(
                Method::Post,
                "GetEntityListByQuery",
                Some(json!({
                    "EntityType": entity_type,
                    "Page": 1,
                    "PageSize": LOOKUP_PAGE_SIZE,
                })),
            )
            .await?;

        let options: Vec<EnumOption> = response
            .get("Data")
            .and_then(Value::as_array)
            .map(|records| records.iter().filter_map(option_from_record).collect())
            .unwrap_or_default();

        debug!("Loaded {} {} values", options.len(), entity_type);
        let options = Arc::new(options);
        self.lookups
            .insert(entity_type.to_string(), Arc::clone(&options));
        Ok(options)
    }
}

fn option_from_record(record: &Value) -> Option<EnumOption> {
    let id = record.get("Id").and_then(Value::as_i64)?;
    let names = NAME_FIELDS
        .iter()
        .filter_map(|field| record.get(*field).and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    Some(EnumOption { id, names })
}
