use async_trait::async_trait;
use bastion_application::{DatasetSnapshot, PartitionSnapshot, SnapshotSource, TableSnapshot};
use bastion_core::AppResult;
use bastion_domain::{ChangeCursor, ProtectedResourceRegistry};
use chrono::Utc;

use super::InMemoryComplianceStore;

#[async_trait]
impl SnapshotSource for InMemoryComplianceStore {
    async fn capture_snapshot(
        &self,
        registry: &ProtectedResourceRegistry,
        since: Option<ChangeCursor>,
    ) -> AppResult<DatasetSnapshot> {
        // Commits take the write lock, so nothing lands while this guard lives.
        let state = self.state.read().await;
        let snapshot_at = Utc::now();
        let change_cursor = ChangeCursor::new(state.last_commit_sequence + 1)?;
        let changed =
            |commit_sequence: i64| since.is_none_or(|since| commit_sequence >= since.position());

        let tables = registry
            .iter()
            .map(|resource| {
                let mut rows: Vec<_> = state
                    .rows
                    .iter()
                    .filter(|((table, _), row)| {
                        table == resource.storage_table() && changed(row.commit_sequence)
                    })
                    .map(|(_, row)| row.record.clone())
                    .collect();
                rows.sort_by(|left, right| left.record_id.cmp(&right.record_id));
                TableSnapshot {
                    storage_table: resource.storage_table().to_owned(),
                    rows,
                }
            })
            .collect();

        let partitions = state
            .partitions
            .iter()
            .map(|(partition, records)| PartitionSnapshot {
                partition: *partition,
                records: records
                    .iter()
                    .filter(|stored| changed(stored.commit_sequence))
                    .map(|stored| stored.record.clone())
                    .collect(),
            })
            .filter(|snapshot| since.is_none() || !snapshot.records.is_empty())
            .collect();

        Ok(DatasetSnapshot {
            snapshot_at,
            change_cursor,
            tables,
            partitions,
        })
    }
}
