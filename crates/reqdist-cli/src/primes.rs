//! Prime search demo workload.
//!
//! The range `[0, limit)` is cut into 50 slices per available node. Each
//! slice declares a very high processing factor so every node runs one
//! slice at a time.

use std::sync::Arc;

use reqdist_common::protocol::error::{ReqdistError, Result};
use reqdist_common::protocol::{RequisitionCatalog, WireRequisition};
use reqdist_common::requisition::{DivisibleRequisition, IndivisibleRequisition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire kind of [`PrimeSlice`].
pub const PRIME_SLICE_KIND: &str = "prime-slice";

const SLICES_PER_NODE: usize = 50;
const SLICE_PROCESSING_FACTOR: i64 = 100_000;

/// Finds every prime below `limit`.
#[derive(Debug, Clone)]
pub struct PrimeSearch {
    pub limit: u64,
}

impl DivisibleRequisition for PrimeSearch {
    fn sub_requisitions(&self, available_nodes: usize) -> Vec<Arc<dyn IndivisibleRequisition>> {
        let count = (available_nodes.max(1) * SLICES_PER_NODE) as u64;
        let per_slice = self.limit / count;
        // The first slice absorbs the remainder
        let extra = self.limit - per_slice * count;

        (0..count)
            .map(|i| {
                let slice = if i == 0 {
                    PrimeSlice {
                        start: 0,
                        len: per_slice + extra,
                    }
                } else {
                    PrimeSlice {
                        start: extra + i * per_slice,
                        len: per_slice,
                    }
                };
                Arc::new(slice) as Arc<dyn IndivisibleRequisition>
            })
            .collect()
    }

    fn response(&self, results: Vec<Value>) -> Result<Value> {
        let mut primes = Vec::new();
        for result in results {
            let slice: Vec<u64> = serde_json::from_value(result)
                .map_err(|e| ReqdistError::InvalidResponse(format!("bad prime slice: {}", e)))?;
            primes.extend(slice);
        }
        Ok(serde_json::to_value(primes)?)
    }
}

/// Primes in `[start, start + len)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimeSlice {
    pub start: u64,
    pub len: u64,
}

impl IndivisibleRequisition for PrimeSlice {
    fn process(&self) -> Result<Value> {
        let primes: Vec<u64> = (self.start..self.start + self.len).filter(|n| is_prime(*n)).collect();
        Ok(serde_json::to_value(primes)?)
    }

    fn processing_factor(&self) -> i64 {
        SLICE_PROCESSING_FACTOR
    }

    fn to_wire(&self) -> Option<WireRequisition> {
        WireRequisition::from_serde(PRIME_SLICE_KIND, self).ok()
    }
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    let mut divisor = 2;
    while divisor * divisor <= n {
        if n % divisor == 0 {
            return false;
        }
        divisor += 1;
    }
    true
}

/// Catalog of the kinds a demo node can run.
pub fn catalog() -> RequisitionCatalog {
    let mut catalog = RequisitionCatalog::new();
    catalog.register_serde::<PrimeSlice>(PRIME_SLICE_KIND);
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_slices_cover_range() {
        let search = PrimeSearch { limit: 1_003 };
        let units = search.sub_requisitions(2);
        assert_eq!(units.len(), 100);

        let mut next = 0;
        for unit in &units {
            let wire = unit.to_wire().unwrap();
            let slice: PrimeSlice = serde_json::from_value(wire.payload).unwrap();
            assert_eq!(slice.start, next);
            next += slice.len;
        }
        assert_eq!(next, 1_003);
    }

    #[test]
    fn test_local_process_finds_primes() {
        let search = PrimeSearch { limit: 30 };
        assert_eq!(search.process().unwrap(), json!([2, 3, 5, 7, 11, 13, 17, 19, 23, 29]));
    }

    #[test]
    fn test_catalog_decodes_slices() {
        let slice = PrimeSlice { start: 10, len: 10 };
        let unit = catalog().decode(slice.to_wire().unwrap()).unwrap();
        assert_eq!(unit.process().unwrap(), json!([11, 13, 17, 19]));
        assert_eq!(unit.processing_factor(), SLICE_PROCESSING_FACTOR);
    }
}
