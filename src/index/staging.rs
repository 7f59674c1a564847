use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::{compact_batches, WordsBatch};
use crate::error::{IndexError, Result};
use crate::storage::WordsJournal;

/// 已摄入、等待下一次 reindex 的批次（查询链路从不读取）
///
/// 日志与内存列表在同一把写锁下变更，二者的批次序列始终一致。
pub struct Staging {
    batches: RwLock<Vec<Arc<WordsBatch>>>,
    journal: Option<WordsJournal>,
}

impl Staging {
    pub fn in_memory() -> Self {
        Self {
            batches: RwLock::new(Vec::new()),
            journal: None,
        }
    }

    /// 挂载日志并回放历史批次
    pub fn with_journal(journal: WordsJournal) -> anyhow::Result<Self> {
        let replay = journal.replay()?;
        if replay.truncated_tail_records > 0 {
            tracing::warn!(
                "Words journal replay dropped {} damaged tail record(s)",
                replay.truncated_tail_records
            );
        }
        tracing::info!("Words journal replay: {} batches", replay.batches.len());
        let batches = replay.batches.into_iter().map(Arc::new).collect();
        Ok(Self {
            batches: RwLock::new(batches),
            journal: Some(journal),
        })
    }

    /// 先写日志后入内存：日志失败则整批拒绝
    pub fn push(&self, batch: WordsBatch) -> Result<()> {
        let mut batches = self.batches.write();
        if let Some(journal) = &self.journal {
            journal.append(&batch).map_err(journal_error)?;
        }
        batches.push(Arc::new(batch));
        Ok(())
    }

    /// 把一次成功构建消费掉的批次前缀压缩成一批，并同步重写日志。
    ///
    /// 构建期间新到的批次原样排在合并批之后。前缀已经变化时什么都不做。
    /// 返回是否真的压缩了。
    pub fn compact(&self, consumed: &[Arc<WordsBatch>]) -> Result<bool> {
        if consumed.len() < 2 {
            return Ok(false);
        }
        let merged = Arc::new(compact_batches(consumed)?);

        let mut batches = self.batches.write();
        let is_prefix = batches.len() >= consumed.len()
            && batches
                .iter()
                .zip(consumed)
                .all(|(have, used)| Arc::ptr_eq(have, used));
        if !is_prefix {
            tracing::debug!("Staging changed since build started, skipping compaction");
            return Ok(false);
        }

        let mut next = Vec::with_capacity(batches.len() - consumed.len() + 1);
        next.push(merged);
        next.extend(batches[consumed.len()..].iter().cloned());
        if let Some(journal) = &self.journal {
            journal.rewrite(&next).map_err(journal_error)?;
        }

        tracing::info!(
            "Staging compacted: {} batches -> {}",
            batches.len(),
            next.len()
        );
        *batches = next;
        Ok(true)
    }

    /// 当前全部批次的廉价拷贝（Arc），供后台 reindex 使用
    pub fn snapshot(&self) -> Vec<Arc<WordsBatch>> {
        self.batches.read().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.read().len()
    }

    pub fn document_count(&self) -> usize {
        self.batches.read().iter().map(|b| b.len()).sum()
    }
}

fn journal_error(e: anyhow::Error) -> IndexError {
    match e.downcast::<std::io::Error>() {
        Ok(io) => IndexError::Io(io),
        Err(other) => IndexError::Journal(format!("{:#}", other)),
    }
}
