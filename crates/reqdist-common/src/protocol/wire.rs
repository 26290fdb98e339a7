//! Wire form of indivisible requisitions.
//!
//! A unit travels as a `kind` tag plus a JSON payload. Worker nodes keep a
//! [`RequisitionCatalog`] mapping each kind to a decoder that rebuilds the
//! concrete unit.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ReqdistError, Result};
use crate::requisition::IndivisibleRequisition;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireRequisition {
    pub kind: String,
    pub payload: Value,
}

impl WireRequisition {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Serializes `unit` as the payload of a `kind` requisition.
    pub fn from_serde<T: Serialize>(kind: impl Into<String>, unit: &T) -> Result<Self> {
        Ok(Self::new(kind, serde_json::to_value(unit)?))
    }
}

type Decoder = dyn Fn(Value) -> Result<Arc<dyn IndivisibleRequisition>> + Send + Sync;

/// Decoders for the requisition kinds a node knows how to run.
#[derive(Clone, Default)]
pub struct RequisitionCatalog {
    decoders: HashMap<String, Arc<Decoder>>,
}

impl RequisitionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom decoder for `kind`, replacing any previous one.
    pub fn register<F>(&mut self, kind: impl Into<String>, decoder: F)
    where
        F: Fn(Value) -> Result<Arc<dyn IndivisibleRequisition>> + Send + Sync + 'static,
    {
        self.decoders.insert(kind.into(), Arc::new(decoder));
    }

    /// Registers `T` to be decoded straight from the payload with serde.
    pub fn register_serde<T>(&mut self, kind: impl Into<String>)
    where
        T: IndivisibleRequisition + DeserializeOwned + 'static,
    {
        self.register(kind, |payload| {
            let unit: T = serde_json::from_value(payload)?;
            Ok(Arc::new(unit) as Arc<dyn IndivisibleRequisition>)
        });
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    pub fn decode(&self, wire: WireRequisition) -> Result<Arc<dyn IndivisibleRequisition>> {
        let decoder = self.decoders.get(&wire.kind).ok_or_else(|| {
            ReqdistError::InvalidRequest(format!("unknown requisition kind '{}'", wire.kind))
        })?;
        decoder(wire.payload)
    }
}

impl std::fmt::Debug for RequisitionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequisitionCatalog")
            .field("kinds", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}
