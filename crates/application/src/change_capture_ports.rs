mod audit;
mod mutations;
mod partitions;

pub use audit::{AuditQuery, AuditRecordReader, AuditTransaction};
pub use mutations::{MutationStore, MutationTransaction};
pub use partitions::PartitionCatalog;
