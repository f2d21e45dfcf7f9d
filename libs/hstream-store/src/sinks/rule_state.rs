use super::SharedStore;
use crate::error::Result;
use crate::tables::{TableKind, RULE_FAMILY};
use bytes::Bytes;
use hstream_model::FiredRule;
use std::collections::HashMap;

/// Qualifier of the last verdict cell
pub const STATE_QUALIFIER: &str = "state";

/// Last verdict per rule, read back on startup to rehydrate alarms
///
/// Row = rule id, `rule:state` = `{"ruleId":..,"fired":..,"firedAt":..}`.
#[derive(Clone)]
pub struct RuleStateSink {
    store: SharedStore,
    table: String,
}

impl RuleStateSink {
    pub fn new(store: SharedStore, project_id: i64) -> Self {
        Self {
            store,
            table: TableKind::RuleState.table_name(project_id),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn save(&self, rule: &FiredRule) -> Result<()> {
        self.store
            .put(
                &self.table,
                &rule.rule_id.to_string(),
                RULE_FAMILY,
                STATE_QUALIFIER,
                Bytes::from(serde_json::to_vec(rule)?),
            )
            .await
    }

    pub async fn load(&self, rule_id: i64) -> Result<Option<FiredRule>> {
        let value = self
            .store
            .get(&self.table, &rule_id.to_string(), RULE_FAMILY, STATE_QUALIFIER)
            .await?;
        Ok(match value {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        })
    }

    /// Every persisted verdict keyed by rule id; corrupt cells are skipped
    pub async fn load_all(&self) -> Result<HashMap<i64, FiredRule>> {
        let rows = self.store.scan_family(&self.table, RULE_FAMILY, "").await?;
        let mut rules = HashMap::with_capacity(rows.len());
        for row in rows {
            let Some(bytes) = row.cells.get(STATE_QUALIFIER) else {
                continue;
            };
            match serde_json::from_slice::<FiredRule>(bytes) {
                Ok(rule) => {
                    rules.insert(rule.rule_id, rule);
                },
                Err(e) => {
                    tracing::warn!(table = %self.table, row = %row.row, "Skipping corrupt rule state: {}", e);
                },
            }
        }
        Ok(rules)
    }
}
