use std::sync::Arc;

use witchcraft_metrics::{Counter, MetricRegistry};

/// Counters kept by a [`crate::Database`].
#[derive(Default)]
pub struct StoreMetrics {
    registry: MetricRegistry,
}

impl StoreMetrics {
    pub const RECORDS_ADDED: &'static str = "molstore.records.added";
    pub const GROUPS_CREATED: &'static str = "molstore.groups.created";
    pub const ROWS_READ: &'static str = "molstore.rows.read";
    pub const BATCH_READS: &'static str = "molstore.batch.reads";

    pub fn new(registry: MetricRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn records_added(&self) -> Arc<Counter> {
        self.registry.counter(Self::RECORDS_ADDED)
    }

    pub fn groups_created(&self) -> Arc<Counter> {
        self.registry.counter(Self::GROUPS_CREATED)
    }

    pub fn rows_read(&self) -> Arc<Counter> {
        self.registry.counter(Self::ROWS_READ)
    }

    pub fn batch_reads(&self) -> Arc<Counter> {
        self.registry.counter(Self::BATCH_READS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_shared_by_name() {
        let metrics = StoreMetrics::default();
        metrics.records_added().inc();
        metrics.records_added().add(2);
        assert_eq!(metrics.records_added().count(), 3);
        assert_eq!(metrics.rows_read().count(), 0);
    }
}
