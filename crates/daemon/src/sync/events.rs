use common::Category;

use super::synchronizer::CycleReport;

/// Events emitted by the synchronizer
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A rebuilt index was published
    IndexPublished { generation: u64, files: usize },

    /// A category could not be refreshed; its previous snapshot is kept
    CategoryFailed { category: Category, error: String },

    /// A cycle ran to completion
    CycleFinished { report: CycleReport },
}
