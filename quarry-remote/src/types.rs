//! Wire types for the remote resolve endpoints.

use quarry_core::{Key, Record};
use serde::{Deserialize, Serialize};

/// One resolved entity as the remote sends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    pub id: Key,
    pub name: String,
    pub category: String,
}

impl WireRecord {
    pub fn into_record(self) -> (Key, Record) {
        (self.id, Record::new(self.name, self.category))
    }
}

/// Bulk response body. The request body is a bare JSON array of keys.
pub type BulkResponse = Vec<WireRecord>;
