use async_trait::async_trait;
use bastion_application::MaintenanceExecutor;
use bastion_core::AppResult;
use bastion_domain::AUDIT_LOG_TABLE;

use super::InMemoryComplianceStore;

impl InMemoryComplianceStore {
    async fn row_count(&self, tables: &[String]) -> usize {
        let state = self.state.read().await;
        let protected_rows = state
            .rows
            .keys()
            .filter(|(table, _)| tables.contains(table))
            .count();
        let audit_rows = if tables.iter().any(|table| table == AUDIT_LOG_TABLE) {
            state.partitions.values().map(Vec::len).sum()
        } else {
            0
        };
        protected_rows + audit_rows
    }
}

#[async_trait]
impl MaintenanceExecutor for InMemoryComplianceStore {
    async fn analyze(&self, tables: &[String]) -> AppResult<String> {
        let rows = self.row_count(tables).await;
        Ok(format!("analyzed {} tables covering {rows} rows", tables.len()))
    }

    async fn reindex(&self, tables: &[String]) -> AppResult<String> {
        Ok(format!("reindexed {} tables", tables.len()))
    }

    async fn vacuum(&self, tables: &[String]) -> AppResult<String> {
        let rows = self.row_count(tables).await;
        Ok(format!("vacuumed {} tables holding {rows} live rows", tables.len()))
    }

    async fn refresh_derived_reports(&self) -> AppResult<String> {
        let mut state = self.state.write().await;
        let mut report = std::collections::BTreeMap::new();
        for (table, _) in state.rows.keys() {
            *report.entry(table.clone()).or_insert(0_usize) += 1;
        }
        let audit_rows: usize = state.partitions.values().map(Vec::len).sum();
        report.insert(AUDIT_LOG_TABLE.to_owned(), audit_rows);

        let entries = report.len();
        state.derived_reports = report;
        Ok(format!("refreshed row counts for {entries} tables"))
    }
}
