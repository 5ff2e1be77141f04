//! State store contract and in-memory implementation
//!
//! A state record is the last-applied snapshot of one instance. Records are
//! created by a successful Create, replaced by a successful Update and
//! removed by a successful Destroy. Only the executor writes to a store
//! during apply.

use crate::error::Result;
use crate::types::{Address, Attributes, Reference, Value, Values};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last-applied snapshot of one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Instance address
    pub address: Address,
    /// Resource type as recorded at apply time
    pub resource_type: String,
    /// Identifier assigned by the provider
    pub provider_id: String,
    /// Attributes as declared when last applied (references kept)
    #[serde(default)]
    pub attributes: Attributes,
    /// Provider-reported outputs
    #[serde(default)]
    pub outputs: Values,
    /// Dependencies as deployed, used to order destroys
    #[serde(default)]
    pub dependencies: Vec<Address>,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    /// Read an output for a reference: `id`, a provider output, or a
    /// literal attribute, in that order.
    pub fn output(&self, name: &str) -> Option<Value> {
        if name == "id" {
            return Some(Value::String(self.provider_id.clone()));
        }
        if let Some(value) = self.outputs.get(name) {
            return Some(value.clone());
        }
        match self.attributes.get(name) {
            Some(crate::types::Attr::Value(v)) => Some(v.clone()),
            _ => None,
        }
    }
}

/// Point-in-time copy of every record, ordered by address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub records: BTreeMap<Address, StateRecord>,
}

impl StateSnapshot {
    /// Look up a record
    pub fn get(&self, address: &Address) -> Option<&StateRecord> {
        self.records.get(address)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the snapshot has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Resolve a reference against the snapshot
    pub fn lookup(&self, reference: &Reference) -> Option<Value> {
        self.records
            .get(&reference.target)
            .and_then(|r| r.output(reference.output_name()))
    }

    /// Content fingerprint (blake3 over the canonical JSON form).
    ///
    /// `updated_at` is part of the content, so any write changes it.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(&self.records)?;
        Ok(blake3::hash(&canonical).to_hex().to_string())
    }
}

/// Persistence contract for state records.
///
/// Implementations must be durable after `put`/`delete` return: a crash
/// afterwards must not lose the write.
pub trait StateStore: Send {
    /// Read one record
    fn get(&self, address: &Address) -> Result<Option<StateRecord>>;

    /// Insert or replace a record
    fn put(&mut self, record: StateRecord) -> Result<()>;

    /// Remove a record (removing a missing record is not an error)
    fn delete(&mut self, address: &Address) -> Result<()>;

    /// Copy of all records
    fn snapshot(&self) -> Result<StateSnapshot>;
}

/// Volatile store, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    snapshot: StateSnapshot,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a snapshot
    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        Self { snapshot }
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, address: &Address) -> Result<Option<StateRecord>> {
        Ok(self.snapshot.records.get(address).cloned())
    }

    fn put(&mut self, record: StateRecord) -> Result<()> {
        self.snapshot.records.insert(record.address.clone(), record);
        Ok(())
    }

    fn delete(&mut self, address: &Address) -> Result<()> {
        self.snapshot.records.remove(address);
        Ok(())
    }

    fn snapshot(&self) -> Result<StateSnapshot> {
        Ok(self.snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attr;

    fn record(address: &str) -> StateRecord {
        StateRecord {
            address: address.parse().unwrap(),
            resource_type: "aws_vpc".into(),
            provider_id: "vpc-123".into(),
            attributes: Attributes::from([(
                "cidr_block".to_string(),
                Attr::Value(Value::from("10.0.0.0/16")),
            )]),
            outputs: Values::from([("arn".to_string(), Value::from("arn:vpc-123"))]),
            dependencies: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_output_lookup_order() {
        let r = record("aws_vpc.main");
        assert_eq!(r.output("id"), Some(Value::from("vpc-123")));
        assert_eq!(r.output("arn"), Some(Value::from("arn:vpc-123")));
        assert_eq!(r.output("cidr_block"), Some(Value::from("10.0.0.0/16")));
        assert_eq!(r.output("missing"), None);
    }

    #[test]
    fn test_memory_store_put_get_delete() {
        let mut store = MemoryStateStore::new();
        let address: Address = "aws_vpc.main".parse().unwrap();
        store.put(record("aws_vpc.main")).unwrap();
        assert!(store.get(&address).unwrap().is_some());
        assert_eq!(store.snapshot().unwrap().len(), 1);

        store.delete(&address).unwrap();
        assert!(store.get(&address).unwrap().is_none());
        // Deleting twice is fine
        store.delete(&address).unwrap();
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let mut snapshot = StateSnapshot::default();
        let empty = snapshot.fingerprint().unwrap();
        let r = record("aws_vpc.main");
        snapshot.records.insert(r.address.clone(), r);
        let one = snapshot.fingerprint().unwrap();
        assert_ne!(empty, one);
        assert_eq!(one, snapshot.clone().fingerprint().unwrap());
    }
}
