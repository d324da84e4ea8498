//! Dataset lookup port.

use serde::{Deserialize, Serialize};

use super::CoreError;

/// What the orchestration core needs to know about a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub dataset_id: String,
    pub image_count: u64,
}

/// Resolves dataset identifiers to their current contents.
///
/// Called once per submission; the image count is snapshotted into the
/// training configuration and not re-read while the job runs.
pub trait DatasetCatalog: Send + Sync {
    fn dataset(&self, dataset_id: &str) -> Result<DatasetInfo, CoreError>;
}
