//! Index definitions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical kind of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Ordered B-tree over one or more fields
    Btree,
    /// Planar geospatial index over a single point field
    Geo2d,
}

/// Declarative description of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    name: String,
    fields: Vec<String>,
    kind: IndexKind,
}

impl IndexSpec {
    /// Name of the primary key index
    pub const ID_INDEX_NAME: &'static str = "_id_";

    /// B-tree index over the given fields, ascending.
    ///
    /// Named `a_1_b_1` after its fields.
    pub fn btree(fields: &[&str]) -> Self {
        let name = fields
            .iter()
            .map(|f| format!("{}_1", f))
            .collect::<Vec<_>>()
            .join("_");
        Self {
            name,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            kind: IndexKind::Btree,
        }
    }

    /// The `_id` index every normal collection carries
    pub fn id() -> Self {
        Self {
            name: Self::ID_INDEX_NAME.to_string(),
            fields: vec!["_id".to_string()],
            kind: IndexKind::Btree,
        }
    }

    /// Geospatial index over a point field
    pub fn geo(field: &str) -> Self {
        Self {
            name: format!("{}_2d", field),
            fields: vec![field.to_string()],
            kind: IndexKind::Geo2d,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Leading key field
    pub fn first_field(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or("")
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Whether this is the primary key index
    pub fn is_id_index(&self) -> bool {
        self.kind == IndexKind::Btree && self.fields.len() == 1 && self.fields[0] == "_id"
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            IndexKind::Btree => "1",
            IndexKind::Geo2d => "\"2d\"",
        };
        let body = self
            .fields
            .iter()
            .map(|field| format!("{}: {}", field, kind))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{ {} }}", body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_btree_naming() {
        assert_eq!(IndexSpec::btree(&["a"]).name(), "a_1");
        assert_eq!(IndexSpec::btree(&["_id", "a"]).name(), "_id_1_a_1");
        assert_eq!(IndexSpec::geo("loc").name(), "loc_2d");
        assert_eq!(IndexSpec::id().name(), "_id_");
    }

    #[test]
    fn test_id_index_detection() {
        assert!(IndexSpec::id().is_id_index());
        assert!(IndexSpec::btree(&["_id"]).is_id_index());
        assert!(!IndexSpec::btree(&["_id", "a"]).is_id_index());
        assert!(!IndexSpec::geo("_id").is_id_index());
    }

    #[test]
    fn test_display() {
        assert_eq!(IndexSpec::btree(&["a", "b"]).to_string(), "{ a: 1, b: 1 }");
        assert_eq!(IndexSpec::geo("loc").to_string(), "{ loc: \"2d\" }");
    }
}
