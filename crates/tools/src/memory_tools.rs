//! Memory tools: let an agent store, read and forget scoped memory.
//!
//! Every call addresses memory with a `scope` (`project`, `client`, `org`
//! or `chain`) and, except for `org`, a `scope_id`. The team always comes
//! from the tool context, so an agent can never reach another team's rows.

use async_trait::async_trait;
use foreman_core::error::ToolError;
use foreman_core::memory::{MemoryAddress, MemoryScope, MemoryStore, StoreOptions};
use foreman_core::tool::{Tool, ToolContext};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

fn address_schema() -> serde_json::Map<String, Value> {
    let schema = json!({
        "scope": {
            "type": "string",
            "enum": ["project", "client", "org", "chain"],
            "description": "Which memory partition to use"
        },
        "scope_id": {
            "type": "string",
            "description": "Project, client or chain run id (omit for org scope)"
        },
        "key": { "type": "string", "description": "Memory key" }
    });
    match schema {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

fn parse_address(context: &ToolContext, params: &Value) -> Result<MemoryAddress, ToolError> {
    let raw_scope = params["scope"]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments("Missing 'scope' argument".into()))?;
    let scope = MemoryScope::parse(raw_scope)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Unknown scope '{raw_scope}'")))?;

    if scope == MemoryScope::Org {
        return Ok(MemoryAddress::org(context.team_id));
    }

    let scope_id = params["scope_id"]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("'scope_id' is required for {scope} scope")))?;
    let scope_id = Uuid::parse_str(scope_id)
        .map_err(|e| ToolError::InvalidArguments(format!("Invalid 'scope_id': {e}")))?;
    Ok(MemoryAddress::new(context.team_id, scope, scope_id))
}

fn parse_key(params: &Value) -> Result<&str, ToolError> {
    params["key"]
        .as_str()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments("Missing 'key' argument".into()))
}

fn storage_failure(tool_name: &str, error: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool_name.into(),
        reason: error.to_string(),
    }
}

/// Store a value under a key.
pub struct RememberTool {
    memory: Arc<dyn MemoryStore>,
    default_ttl_minutes: Option<i64>,
}

impl RememberTool {
    pub fn new(memory: Arc<dyn MemoryStore>, default_ttl_minutes: Option<i64>) -> Self {
        Self {
            memory,
            default_ttl_minutes,
        }
    }
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember"
    }

    fn description(&self) -> &str {
        "Store a value in shared memory so later steps, agents or sessions can use it."
    }

    fn category(&self) -> &str {
        "memory"
    }

    fn parameters_schema(&self) -> Value {
        let mut properties = address_schema();
        properties.insert("value".into(), json!({ "description": "Any JSON value" }));
        properties.insert(
            "ttl_minutes".into(),
            json!({ "type": "integer", "description": "Expire the entry after this many minutes" }),
        );
        json!({
            "type": "object",
            "properties": properties,
            "required": ["scope", "key", "value"]
        })
    }

    async fn execute(&self, context: &ToolContext, params: Value) -> Result<Value, ToolError> {
        let address = parse_address(context, &params)?;
        let key = parse_key(&params)?;
        let value = params
            .get("value")
            .cloned()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'value' argument".into()))?;

        let ttl = match params.get("ttl_minutes") {
            Some(Value::Null) | None => self.default_ttl_minutes,
            Some(raw) => Some(
                raw.as_i64()
                    .filter(|m| *m > 0)
                    .ok_or_else(|| ToolError::InvalidArguments("'ttl_minutes' must be a positive integer".into()))?,
            ),
        };

        let mut options = StoreOptions::by_agent(context.agent_id);
        if let Some(minutes) = ttl {
            options = options.with_ttl_minutes(minutes);
        }

        let entry = self
            .memory
            .store(&address, key, value, options)
            .await
            .map_err(|e| storage_failure(self.name(), e))?;

        Ok(json!({
            "stored": true,
            "key": entry.key,
            "scope": entry.address.scope,
            "expires_at": entry.expires_at,
        }))
    }
}

/// Read a value, or every visible entry at an address when no key is given.
pub struct RecallTool {
    memory: Arc<dyn MemoryStore>,
}

impl RecallTool {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Read a value from shared memory. Omit 'key' to list everything in the scope."
    }

    fn category(&self) -> &str {
        "memory"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": address_schema(),
            "required": ["scope"]
        })
    }

    async fn execute(&self, context: &ToolContext, params: Value) -> Result<Value, ToolError> {
        let address = parse_address(context, &params)?;

        if params.get("key").is_none_or(Value::is_null) {
            let entries = self
                .memory
                .entries(&address)
                .await
                .map_err(|e| storage_failure(self.name(), e))?;
            return Ok(json!({
                "entries": foreman_core::memory::entries_to_object(&entries),
            }));
        }

        let key = parse_key(&params)?;
        let value = self
            .memory
            .retrieve(&address, key)
            .await
            .map_err(|e| storage_failure(self.name(), e))?;
        Ok(json!({
            "key": key,
            "found": value.is_some(),
            "value": value,
        }))
    }
}

/// Tombstone a key.
pub struct ForgetMemoryTool {
    memory: Arc<dyn MemoryStore>,
}

impl ForgetMemoryTool {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for ForgetMemoryTool {
    fn name(&self) -> &str {
        "forget_memory"
    }

    fn description(&self) -> &str {
        "Forget a value previously stored in shared memory."
    }

    fn category(&self) -> &str {
        "memory"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": address_schema(),
            "required": ["scope", "key"]
        })
    }

    async fn execute(&self, context: &ToolContext, params: Value) -> Result<Value, ToolError> {
        let address = parse_address(context, &params)?;
        let key = parse_key(&params)?;
        let forgotten = self
            .memory
            .forget(&address, key)
            .await
            .map_err(|e| storage_failure(self.name(), e))?;
        Ok(json!({ "key": key, "forgotten": forgotten }))
    }
}
