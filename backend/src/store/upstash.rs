//! Upstash Redis REST adapter.
//!
//! Every primitive is one `POST` of a JSON command array to the database URL.
//! The conditional primitives run as server-side scripts so each stays a
//! single atomic call.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::{GuardedWrite, StateStore, StoreError};

const SET_MISSING_SCRIPT: &str = "for i = 1, #ARGV, 2 do \
redis.call('HSETNX', KEYS[1], ARGV[i], ARGV[i + 1]) \
end \
return 1";

const SET_IF_EMPTY_SCRIPT: &str = "local current = redis.call('HGET', KEYS[1], ARGV[1]) \
if current and string.match(current, '%S') then return 0 end \
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2]) \
return 1";

// KEYS: guard hash, target hash. ARGV: guard field, guard value, target
// field, value. Replies 0 written, 1 guard held, 2 target filled.
const SET_GUARDED_SCRIPT: &str = "local function trim(s) return (string.gsub(s, '^%s*(.-)%s*$', '%1')) end \
local guard = redis.call('HGET', KEYS[1], ARGV[1]) \
if guard and string.lower(trim(guard)) == string.lower(trim(ARGV[2])) then return 1 end \
local current = redis.call('HGET', KEYS[2], ARGV[3]) \
if current and string.match(current, '%S') then return 2 end \
redis.call('HSET', KEYS[2], ARGV[3], ARGV[4]) \
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2]) \
return 0";

#[derive(Clone)]
pub struct UpstashStore {
    client: Client,
    url: String,
    token: String,
}

#[derive(Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl UpstashStore {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn command(&self, operation: &'static str, args: Vec<String>) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await
            .map_err(|e| StoreError::unavailable(operation, e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StoreError::unavailable(operation, status));
        }

        let reply: RestReply = response
            .json()
            .await
            .map_err(|e| StoreError::protocol(operation, e))?;
        decode_reply(operation, reply)
    }
}

fn decode_reply(operation: &'static str, reply: RestReply) -> Result<Value, StoreError> {
    if let Some(error) = reply.error {
        return Err(StoreError::protocol(operation, error));
    }
    Ok(reply.result.unwrap_or(Value::Null))
}

fn command_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn push_fields(args: &mut Vec<String>, fields: &[(String, String)]) {
    for (field, value) in fields {
        args.push(field.clone());
        args.push(value.clone());
    }
}

/// HGETALL replies with a flat `[field, value, field, value, ...]` array.
fn fields_from_flat(operation: &'static str, value: Value) -> Result<HashMap<String, String>, StoreError> {
    let items = match value {
        Value::Null => return Ok(HashMap::new()),
        Value::Array(items) => items,
        other => return Err(StoreError::protocol(operation, format!("expected array, got {other}"))),
    };
    if items.len() % 2 != 0 {
        return Err(StoreError::protocol(operation, "odd number of hash entries"));
    }

    let mut fields = HashMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        fields.insert(as_text(operation, field)?, as_text(operation, value)?);
    }
    Ok(fields)
}

fn as_text(operation: &'static str, value: Value) -> Result<String, StoreError> {
    match value {
        Value::String(text) => Ok(text),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(StoreError::protocol(operation, format!("expected string, got {other}"))),
    }
}

fn as_optional_text(operation: &'static str, value: Value) -> Result<Option<String>, StoreError> {
    match value {
        Value::Null => Ok(None),
        other => as_text(operation, other).map(Some),
    }
}

fn as_count(operation: &'static str, value: Value) -> Result<u64, StoreError> {
    value
        .as_u64()
        .ok_or_else(|| StoreError::protocol(operation, format!("expected integer, got {value}")))
}

fn as_guarded(operation: &'static str, value: Value) -> Result<GuardedWrite, StoreError> {
    match as_count(operation, value)? {
        0 => Ok(GuardedWrite::Written),
        1 => Ok(GuardedWrite::GuardHeld),
        2 => Ok(GuardedWrite::TargetFilled),
        other => Err(StoreError::protocol(operation, format!("unknown script reply {other}"))),
    }
}

#[async_trait]
impl StateStore for UpstashStore {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let reply = self.command("HGETALL", command_args(&["HGETALL", key])).await?;
        fields_from_flat("HGETALL", reply)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let reply = self.command("HGET", command_args(&["HGET", key, field])).await?;
        as_optional_text("HGET", reply)
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut args = command_args(&["HSET", key]);
        push_fields(&mut args, fields);
        self.command("HSET", args).await?;
        Ok(())
    }

    async fn hash_set_missing(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut args = command_args(&["EVAL", SET_MISSING_SCRIPT, "1", key]);
        push_fields(&mut args, fields);
        self.command("EVAL hash_set_missing", args).await?;
        Ok(())
    }

    async fn hash_set_if_empty(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let args = command_args(&["EVAL", SET_IF_EMPTY_SCRIPT, "1", key, field, value]);
        let reply = self.command("EVAL hash_set_if_empty", args).await?;
        Ok(as_count("EVAL hash_set_if_empty", reply)? == 1)
    }

    async fn hash_set_guarded(
        &self,
        guard_key: &str,
        guard_field: &str,
        guard_value: &str,
        target_key: &str,
        target_field: &str,
        value: &str,
    ) -> Result<GuardedWrite, StoreError> {
        let args = command_args(&[
            "EVAL",
            SET_GUARDED_SCRIPT,
            "2",
            guard_key,
            target_key,
            guard_field,
            guard_value,
            target_field,
            value,
        ]);
        let reply = self.command("EVAL hash_set_guarded", args).await?;
        as_guarded("EVAL hash_set_guarded", reply)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.command("SADD", command_args(&["SADD", key, member])).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.command("SREM", command_args(&["SREM", key, member])).await?;
        Ok(())
    }

    async fn set_len(&self, key: &str) -> Result<u64, StoreError> {
        let reply = self.command("SCARD", command_args(&["SCARD", key])).await?;
        as_count("SCARD", reply)
    }
}
