use thiserror::Error;

use crate::core::{DocumentId, TermId};
use crate::index::Operation;

/// 索引引擎错误
///
/// 查不到词项/域名不是错误（返回空结果）；这里只覆盖：
/// 上游数据违反不变量、维护操作冲突、资源/IO 失败。
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("batch {batch}: document {document} follows {previous}, documents must be strictly ascending")]
    UnsortedBatch {
        batch: u64,
        previous: DocumentId,
        document: DocumentId,
    },

    #[error("batch {batch}: document {document} has no domain")]
    MissingDomain { batch: u64, document: DocumentId },

    #[error("term {term:?} assigned twice (ids {first} and {second})")]
    DuplicateTerm {
        term: String,
        first: TermId,
        second: TermId,
    },

    #[error("postings of term {term_id} are not strictly ascending at document {document}")]
    UnsortedPostings { term_id: TermId, document: DocumentId },

    #[error("document {document} is posted but belongs to no domain")]
    OrphanDocument { document: DocumentId },

    #[error("invalid partitioning: {0}")]
    InvalidPartitioning(String),

    #[error("maintenance already in progress: {0}")]
    Busy(Operation),

    #[error("index service is not initialized")]
    NotInitialized,

    #[error("maintenance aborted")]
    Aborted,

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("journal error: {0}")]
    Journal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// 上游数据缺陷：重试无意义，需要修数据
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            IndexError::UnsortedBatch { .. }
                | IndexError::MissingDomain { .. }
                | IndexError::DuplicateTerm { .. }
                | IndexError::UnsortedPostings { .. }
                | IndexError::OrphanDocument { .. }
        )
    }
}
