//! Record wrapper and per-source watermark types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON document materialized from exactly one file of exactly one source.
///
/// `url` is the primary key (`origin + filepath`); at most one wrapper
/// exists per url at any time. The `record` body is the validated and
/// preprocessed document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub url: String,
    pub origin: String,
    #[serde(rename = "indexedAt")]
    pub indexed_at: i64,
    pub record: Value,
}

impl Record {
    /// The file path within the owning source (`url` minus `origin`).
    pub fn path(&self) -> &str {
        self.url.strip_prefix(&self.origin).unwrap_or(&self.url)
    }

    /// Resolve a field for index-key derivation and query predicates.
    ///
    /// `:url`, `:origin`, and `:indexedAt` read the wrapper; any other name
    /// reads a top-level field of the record body.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            ":url" => Some(Value::String(self.url.clone())),
            ":origin" => Some(Value::String(self.origin.clone())),
            ":indexedAt" => Some(Value::from(self.indexed_at)),
            _ => self.record.get(name).cloned(),
        }
    }
}

/// Per-source indexing watermark: the last source version fully folded into
/// the primary store. `version` never exceeds the source's own version;
/// equality means the source is converged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub url: String,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Record {
        Record {
            url: "mem://a/profile.json".into(),
            origin: "mem://a".into(),
            indexed_at: 42,
            record: json!({"name": "alice", "age": 30}),
        }
    }

    #[test]
    fn path_strips_origin() {
        assert_eq!(record().path(), "/profile.json");
    }

    #[test]
    fn field_resolution() {
        let r = record();
        assert_eq!(r.field(":url"), Some(json!("mem://a/profile.json")));
        assert_eq!(r.field(":origin"), Some(json!("mem://a")));
        assert_eq!(r.field(":indexedAt"), Some(json!(42)));
        assert_eq!(r.field("name"), Some(json!("alice")));
        assert_eq!(r.field("missing"), None);
    }
}
