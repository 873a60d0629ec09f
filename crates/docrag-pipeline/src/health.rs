use std::sync::Arc;

use serde::{Deserialize, Serialize};

use docrag_core::VectorIndex;

use crate::service::IndexService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStoreStats {
    pub num_documents: usize,
    pub num_chunks: usize,
    pub dimension: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
    pub vector_store_stats: VectorStoreStats,
}

/// Reports readiness of the live index. Never fails.
#[derive(Clone)]
pub struct HealthReporter {
    service: Arc<IndexService>,
}

impl HealthReporter {
    pub fn new(service: Arc<IndexService>) -> Self { Self { service } }

    pub fn report(&self) -> HealthReport {
        match self.service.current() {
            Ok(index) => HealthReport {
                status: HealthStatus::Healthy,
                message: format!("{} index ready", index.backend()),
                vector_store_stats: VectorStoreStats {
                    num_documents: index.num_documents(),
                    num_chunks: index.size(),
                    dimension: index.dimension(),
                },
            },
            Err(_) => HealthReport {
                status: HealthStatus::Degraded,
                message: "no index has been built or loaded".to_string(),
                vector_store_stats: VectorStoreStats::default(),
            },
        }
    }
}
