//! Redis key naming for the table store
//!
//! ```text
//! <ns>:tables                         SET   registered table names
//! <ns>:meta:<table>                   HASH  families, enabled
//! <ns>:<table>:<family>:<row>         HASH  qualifier -> value
//! ```

use serde::{Deserialize, Serialize};

/// Keyspace configuration for the Redis table store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeySpaceConfig {
    /// Namespace prefix of every key (e.g., "hstream" or "test:hstream")
    pub namespace: String,
}

impl Default for KeySpaceConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl KeySpaceConfig {
    /// Production keyspace: `hstream`
    pub fn production() -> Self {
        Self::with_namespace("hstream")
    }

    /// Test keyspace, fully isolated from production keys
    pub fn test() -> Self {
        Self::with_namespace("test:hstream")
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Set of registered table names
    pub fn table_registry(&self) -> String {
        format!("{}:tables", self.namespace)
    }

    /// Metadata hash of one table
    pub fn table_meta(&self, table: &str) -> String {
        format!("{}:meta:{}", self.namespace, table)
    }

    /// Hash holding the cells of one row in one family
    pub fn cell_key(&self, table: &str, family: &str, row: &str) -> String {
        format!("{}:{}:{}:{}", self.namespace, table, family, row)
    }

    /// Prefix shared by all cell hashes of a family
    pub fn family_prefix(&self, table: &str, family: &str) -> String {
        format!("{}:{}:{}:", self.namespace, table, family)
    }

    /// SCAN pattern for rows of a family starting with `row_prefix`
    pub fn family_pattern(&self, table: &str, family: &str, row_prefix: &str) -> String {
        format!(
            "{}{}*",
            escape_glob(&self.family_prefix(table, family)),
            escape_glob(row_prefix)
        )
    }

    /// SCAN pattern for every cell hash of a table
    pub fn table_pattern(&self, table: &str) -> String {
        format!("{}*", escape_glob(&format!("{}:{}:", self.namespace, table)))
    }
}

/// Escape Redis glob metacharacters
fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
