use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{guard_matches, GuardedWrite, StateStore, StoreError};
use grid_core::is_filled;

enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

/// Process-local store. Every primitive runs under one lock acquisition, so
/// the conditional writes are exact.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn hash_mut<'a>(
    entries: &'a mut HashMap<String, Value>,
    key: &str,
) -> Result<&'a mut HashMap<String, String>, StoreError> {
    match entries
        .entry(key.to_string())
        .or_insert_with(|| Value::Hash(HashMap::new()))
    {
        Value::Hash(fields) => Ok(fields),
        Value::Set(_) => Err(StoreError::wrong_type(key)),
    }
}

fn set_mut<'a>(
    entries: &'a mut HashMap<String, Value>,
    key: &str,
) -> Result<&'a mut HashSet<String>, StoreError> {
    match entries
        .entry(key.to_string())
        .or_insert_with(|| Value::Set(HashSet::new()))
    {
        Value::Set(members) => Ok(members),
        Value::Hash(_) => Err(StoreError::wrong_type(key)),
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(fields)) => Ok(fields.clone()),
            Some(Value::Set(_)) => Err(StoreError::wrong_type(key)),
        }
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            None => Ok(None),
            Some(Value::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(Value::Set(_)) => Err(StoreError::wrong_type(key)),
        }
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let hash = hash_mut(&mut entries, key)?;
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hash_set_missing(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let hash = hash_mut(&mut entries, key)?;
        for (field, value) in fields {
            hash.entry(field.clone()).or_insert_with(|| value.clone());
        }
        Ok(())
    }

    async fn hash_set_if_empty(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        let hash = hash_mut(&mut entries, key)?;
        match hash.entry(field.to_string()) {
            Entry::Occupied(existing) if is_filled(existing.get()) => Ok(false),
            Entry::Occupied(mut existing) => {
                existing.insert(value.to_string());
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(value.to_string());
                Ok(true)
            }
        }
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
        let mut entries = self.entries.write().await;

        let guard_held = hash_mut(&mut entries, guard_key)?
            .get(guard_field)
            .is_some_and(|current| guard_matches(current, guard_value));
        if guard_held {
            return Ok(GuardedWrite::GuardHeld);
        }
        let target = hash_mut(&mut entries, target_key)?;
        if target.get(target_field).is_some_and(|current| is_filled(current)) {
            return Ok(GuardedWrite::TargetFilled);
        }

        target.insert(target_field.to_string(), value.to_string());
        hash_mut(&mut entries, guard_key)?.insert(guard_field.to_string(), guard_value.to_string());
        Ok(GuardedWrite::Written)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        set_mut(&mut entries, key)?.insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if let Some(value) = entries.get_mut(key) {
            match value {
                Value::Set(members) => {
                    members.remove(member);
                }
                Value::Hash(_) => return Err(StoreError::wrong_type(key)),
            }
        }
        Ok(())
    }

    async fn set_len(&self, key: &str) -> Result<u64, StoreError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            None => Ok(0),
            Some(Value::Set(members)) => Ok(members.len() as u64),
            Some(Value::Hash(_)) => Err(StoreError::wrong_type(key)),
        }
    }
}
