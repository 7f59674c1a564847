use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::types::{DocumentId, DomainId, RankingMetadata};
use crate::error::{IndexError, Result};

/// 文档中的一个词项及其排序元数据
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordEntry {
    pub term: String,
    #[serde(default)]
    pub meta: RankingMetadata,
}

impl WordEntry {
    pub fn new(term: impl Into<String>, meta: RankingMetadata) -> Self {
        Self {
            term: term.into(),
            meta,
        }
    }
}

/// 转换流水线产出的单文档关键词数据
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document: DocumentId,
    #[serde(default)]
    pub domain: Option<DomainId>,
    #[serde(default)]
    pub words: Vec<WordEntry>,
}

impl DocumentRecord {
    pub fn new(document: DocumentId, domain: DomainId) -> Self {
        Self {
            document,
            domain: Some(domain),
            words: Vec::new(),
        }
    }

    pub fn word(mut self, term: impl Into<String>, meta: RankingMetadata) -> Self {
        self.words.push(WordEntry::new(term, meta));
        self
    }
}

/// `PUT words` 的载荷：一批文档，按 DocumentId 严格递增排列
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordsBatch {
    pub batch_id: u64,
    pub documents: Vec<DocumentRecord>,
}

impl WordsBatch {
    pub fn new(batch_id: u64, documents: Vec<DocumentRecord>) -> Self {
        Self {
            batch_id,
            documents,
        }
    }

    /// 校验上游不变量：文档严格递增、每个文档都归属某个域名。
    /// 失败时错误中带上 batch_id，便于定位上游缺陷。
    pub fn validate(&self) -> Result<()> {
        let mut previous: Option<DocumentId> = None;
        for rec in &self.documents {
            if let Some(prev) = previous {
                if rec.document <= prev {
                    return Err(IndexError::UnsortedBatch {
                        batch: self.batch_id,
                        previous: prev,
                        document: rec.document,
                    });
                }
            }
            if rec.domain.is_none() {
                return Err(IndexError::MissingDomain {
                    batch: self.batch_id,
                    document: rec.document,
                });
            }
            previous = Some(rec.document);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// 把按提交顺序排列的多批合并为一批。
///
/// 同一 DocumentId 以最后提交的记录为准，结果按 DocumentId 升序，
/// batch_id 取最后一批的 batch_id。任何一批不满足不变量则整体失败。
pub fn compact_batches(batches: &[Arc<WordsBatch>]) -> Result<WordsBatch> {
    let mut merged: BTreeMap<DocumentId, &DocumentRecord> = BTreeMap::new();
    for batch in batches {
        batch.validate()?;
        for rec in &batch.documents {
            merged.insert(rec.document, rec);
        }
    }
    let batch_id = batches.last().map(|b| b.batch_id).unwrap_or(0);
    Ok(WordsBatch::new(batch_id, merged.into_values().cloned().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(doc: DocumentId) -> DocumentRecord {
        DocumentRecord::new(doc, 1).word("cat", RankingMetadata::new(1))
    }

    #[test]
    fn ascending_batch_is_valid() {
        let b = WordsBatch::new(1, vec![rec(10), rec(20), rec(30)]);
        assert!(b.validate().is_ok());
        assert!(WordsBatch::new(2, Vec::new()).validate().is_ok());
    }

    #[test]
    fn inversion_and_duplicate_are_rejected() {
        let b = WordsBatch::new(5, vec![rec(10), rec(30), rec(20)]);
        match b.validate() {
            Err(IndexError::UnsortedBatch {
                batch,
                previous,
                document,
            }) => {
                assert_eq!((batch, previous, document), (5, 30, 20));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let dup = WordsBatch::new(6, vec![rec(10), rec(10)]);
        assert!(matches!(
            dup.validate(),
            Err(IndexError::UnsortedBatch { batch: 6, .. })
        ));
    }

    #[test]
    fn record_without_domain_is_rejected() {
        let mut orphan = rec(20);
        orphan.domain = None;
        let b = WordsBatch::new(9, vec![rec(10), orphan]);
        assert!(matches!(
            b.validate(),
            Err(IndexError::MissingDomain {
                batch: 9,
                document: 20
            })
        ));
    }

    #[test]
    fn json_defaults_fill_optional_fields() {
        let b: WordsBatch = serde_json::from_str(
            r#"{"batch_id":3,"documents":[{"document":1,"domain":4,"words":[{"term":"cat"}]}]}"#,
        )
        .unwrap();
        assert_eq!(b.documents[0].words[0].meta, RankingMetadata::default());
    }

    #[test]
    fn compaction_keeps_latest_record_per_document() {
        let first = Arc::new(WordsBatch::new(1, vec![rec(10), rec(30)]));
        let second = Arc::new(WordsBatch::new(
            2,
            vec![
                DocumentRecord::new(20, 2).word("dog", RankingMetadata::new(4)),
                DocumentRecord::new(30, 1).word("bird", RankingMetadata::new(2)),
            ],
        ));
        let c = compact_batches(&[first, second]).unwrap();
        assert_eq!(c.batch_id, 2);
        let docs: Vec<DocumentId> = c.documents.iter().map(|r| r.document).collect();
        assert_eq!(docs, vec![10, 20, 30]);
        assert_eq!(c.documents[2].words[0].term, "bird");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn compaction_rejects_invalid_input() {
        let good = Arc::new(WordsBatch::new(1, vec![rec(10)]));
        let bad = Arc::new(WordsBatch::new(4, vec![rec(30), rec(20)]));
        assert!(matches!(
            compact_batches(&[good, bad]),
            Err(IndexError::UnsortedBatch { batch: 4, .. })
        ));
    }
}
