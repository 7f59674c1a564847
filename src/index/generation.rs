use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::{
    normalize_term, DocumentId, DocumentRecord, DomainId, ExecutionStrategy, Partitioning,
    Posting, WordsBatch,
};
use crate::error::{IndexError, Result};
use crate::index::domain::DomainIndex;
use crate::index::lexicon::Lexicon;
use crate::index::postings::{PostingsBuilder, PostingsList, PostingsStore};
use crate::stats::IndexStats;

/// 一个不可变的索引代际：{词典, postings, 域名索引}。
///
/// 读者通过 `Arc` 持有；最后一个引用释放时整代回收。
#[derive(Debug)]
pub struct IndexGeneration {
    id: u64,
    lexicon: Lexicon,
    postings: PostingsStore,
    domains: DomainIndex,
    partitioning: Partitioning,
    built_at: SystemTime,
}

/// 快照体（bincode）：词项表按 TermId 顺序存放，恢复时 ID 不变
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationSnapshot {
    pub id: u64,
    pub built_at_ns: u64,
    pub partitioning: Partitioning,
    pub terms: Vec<String>,
    pub postings: Vec<PostingsList>,
    pub domains: Vec<(DomainId, Vec<DocumentId>)>,
}

impl IndexGeneration {
    pub fn empty(id: u64, partitioning: Partitioning) -> Self {
        Self {
            id,
            lexicon: Lexicon::new(),
            postings: PostingsStore::default(),
            domains: DomainIndex::new(),
            partitioning,
            built_at: SystemTime::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn postings(&self) -> &PostingsStore {
        &self.postings
    }

    pub fn domains(&self) -> &DomainIndex {
        &self.domains
    }

    pub fn partitioning(&self) -> &Partitioning {
        &self.partitioning
    }

    pub fn built_at(&self) -> SystemTime {
        self.built_at
    }

    /// 发布前的整代校验：
    /// 1) 词典双射 2) 每张 postings 表严格递增 3) 表数与词数一致
    /// 4) 被 post 的文档都属于某个域名
    pub fn verify(&self) -> Result<()> {
        self.lexicon.verify()?;
        self.postings.verify()?;
        if self.postings.term_count() > self.lexicon.len() {
            return Err(IndexError::Snapshot(format!(
                "{} postings lists for {} terms",
                self.postings.term_count(),
                self.lexicon.len()
            )));
        }
        for (_, list) in self.postings.iter() {
            if let Some(orphan) = list
                .documents()
                .iter()
                .find(|d| !self.domains.contains_document(**d))
            {
                return Err(IndexError::OrphanDocument { document: *orphan });
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            generation: self.id,
            built_at_ms: self
                .built_at()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            terms: self.lexicon.len(),
            postings_total: self.postings.total_postings(),
            longest_postings: self.postings.longest(),
            documents: self.domains.document_count(),
            domains: self.domains.domain_count(),
            lexicon_bytes: self.lexicon.estimated_bytes(),
            postings_bytes: self.postings.estimated_bytes(),
            domain_bytes: self.domains.estimated_bytes(),
            process_rss_bytes: IndexStats::read_process_rss(),
        }
    }

    pub fn to_snapshot(&self) -> GenerationSnapshot {
        let built_at_ns = self
            .built_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        GenerationSnapshot {
            id: self.id,
            built_at_ns,
            partitioning: self.partitioning.clone(),
            terms: self.lexicon.terms().to_vec(),
            postings: self.postings.lists().to_vec(),
            domains: self.domains.to_groups(),
        }
    }

    /// 从快照恢复并重新校验（不信任磁盘内容）
    pub fn from_snapshot(snap: GenerationSnapshot) -> Result<Self> {
        let generation = Self {
            id: snap.id,
            lexicon: Lexicon::from_terms(snap.terms)?,
            postings: PostingsStore::from_lists(snap.postings),
            domains: DomainIndex::from_groups(snap.domains),
            partitioning: snap.partitioning,
            built_at: UNIX_EPOCH + Duration::from_nanos(snap.built_at_ns),
        };
        generation.verify()?;
        Ok(generation)
    }
}

/// 新代际构建器：在旁路完整构建 + 校验，失败则什么都不发布
pub struct GenerationBuilder {
    id: u64,
    partitioning: Partitioning,
    strategy: ExecutionStrategy,
}

impl GenerationBuilder {
    pub fn new(id: u64, partitioning: Partitioning) -> Self {
        Self {
            id,
            partitioning,
            strategy: ExecutionStrategy::Serial,
        }
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// reindex：从全部已摄入批次重建。
    ///
    /// 批次按提交顺序合并；后提交的批次对同一 DocumentId 覆盖先前记录。
    /// 合并后按 DocumentId 升序喂给 postings builder，因此每张表天然递增。
    pub fn build(&self, batches: &[Arc<WordsBatch>]) -> Result<IndexGeneration> {
        self.partitioning.validate()?;

        let mut merged: BTreeMap<DocumentId, (u64, &DocumentRecord)> = BTreeMap::new();
        for batch in batches {
            batch.validate()?;
            for rec in &batch.documents {
                merged.insert(rec.document, (batch.batch_id, rec));
            }
        }

        let mut lexicon = Lexicon::new();
        let mut builder = PostingsBuilder::new();
        let mut domains = DomainIndex::new();

        for (document, (batch_id, rec)) in merged {
            let Some(domain) = rec.domain else {
                return Err(IndexError::MissingDomain {
                    batch: batch_id,
                    document,
                });
            };
            if !self.partitioning.assigns(document, domain) {
                continue;
            }
            domains.insert(domain, document);
            for word in &rec.words {
                let Some(term) = normalize_term(&word.term) else {
                    continue;
                };
                let term_id = lexicon.intern(&term);
                builder.push(term_id, Posting::new(document, word.meta));
            }
        }

        let postings = builder.build(self.strategy)?;
        let generation = IndexGeneration {
            id: self.id,
            lexicon,
            postings,
            domains,
            partitioning: self.partitioning.clone(),
            built_at: SystemTime::now(),
        };
        generation.verify()?;
        Ok(generation)
    }

    /// repartition：按新的分区方案过滤已有代际。
    ///
    /// 过滤后为空的词项不进入新词典；新词典按旧 TermId 顺序重新分配 ID。
    pub fn repartition(&self, base: &IndexGeneration) -> Result<IndexGeneration> {
        self.partitioning.validate()?;

        let partitioning = &self.partitioning;
        let domains = base.domains.retain(|doc, dom| partitioning.assigns(doc, dom));

        let filter = |list: &PostingsList| list.retain(|doc| domains.contains_document(doc));
        let filtered: Vec<PostingsList> = if self.strategy.is_parallel() {
            self.strategy
                .install(|| base.postings.lists().par_iter().map(filter).collect())
        } else {
            base.postings.lists().iter().map(filter).collect()
        };

        let mut lexicon = Lexicon::new();
        let mut lists = Vec::new();
        for (term_id, list) in filtered.into_iter().enumerate() {
            if list.is_empty() {
                continue;
            }
            let Some(term) = base.lexicon.term(term_id as u32) else {
                continue;
            };
            lexicon.intern(term);
            lists.push(list);
        }

        let generation = IndexGeneration {
            id: self.id,
            lexicon,
            postings: PostingsStore::from_lists(lists),
            domains,
            partitioning: self.partitioning.clone(),
            built_at: SystemTime::now(),
        };
        generation.verify()?;
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PartitionKey, RankingMetadata};

    fn batch(id: u64, docs: Vec<DocumentRecord>) -> Arc<WordsBatch> {
        Arc::new(WordsBatch::new(id, docs))
    }

    fn sample() -> Vec<Arc<WordsBatch>> {
        vec![batch(
            1,
            vec![
                DocumentRecord::new(10, 1)
                    .word("cat", RankingMetadata::new(2))
                    .word("dog", RankingMetadata::new(1)),
                DocumentRecord::new(20, 2).word("Dog", RankingMetadata::new(3)),
                DocumentRecord::new(30, 1).word("cat", RankingMetadata::new(1)),
            ],
        )]
    }

    #[test]
    fn build_assigns_ids_in_first_seen_order() {
        let g = GenerationBuilder::new(1, Partitioning::All)
            .build(&sample())
            .unwrap();
        assert_eq!(g.lexicon().resolve("cat"), Some(0));
        assert_eq!(g.lexicon().resolve("dog"), Some(1));
        assert_eq!(g.postings().get(0).documents(), &[10, 30]);
        assert_eq!(g.postings().get(1).documents(), &[10, 20]);
        assert_eq!(g.domains().domain_of(20), Some(2));
        assert_eq!(g.domains().document_count(), 3);
    }

    #[test]
    fn later_batch_supersedes_document() {
        let mut batches = sample();
        batches.push(batch(
            2,
            vec![DocumentRecord::new(10, 1).word("bird", RankingMetadata::new(1))],
        ));
        let g = GenerationBuilder::new(1, Partitioning::All)
            .build(&batches)
            .unwrap();
        let cat = g.lexicon().resolve("cat").unwrap();
        assert_eq!(g.postings().get(cat).documents(), &[30]);
        let bird = g.lexicon().resolve("bird").unwrap();
        assert_eq!(g.postings().get(bird).documents(), &[10]);
    }

    #[test]
    fn unsorted_batch_fails_whole_build() {
        let mut batches = sample();
        batches.push(batch(
            9,
            vec![
                DocumentRecord::new(50, 1).word("cat", RankingMetadata::new(1)),
                DocumentRecord::new(40, 1).word("cat", RankingMetadata::new(1)),
            ],
        ));
        let err = GenerationBuilder::new(1, Partitioning::All)
            .build(&batches)
            .unwrap_err();
        assert!(matches!(err, IndexError::UnsortedBatch { batch: 9, .. }));
    }

    #[test]
    fn build_respects_partitioning() {
        let p = Partitioning::Modulo {
            key: PartitionKey::Domain,
            count: 2,
            instance: 1,
        };
        let g = GenerationBuilder::new(1, p).build(&sample()).unwrap();
        assert_eq!(g.domains().document_count(), 2);
        assert!(g.domains().domain_of(20).is_none());
        let dog = g.lexicon().resolve("dog").unwrap();
        assert_eq!(g.postings().get(dog).documents(), &[10]);
    }

    #[test]
    fn repartition_drops_foreign_documents_and_empty_terms() {
        let base = GenerationBuilder::new(1, Partitioning::All)
            .build(&sample())
            .unwrap();
        let p = Partitioning::Range { start: 15, end: 25 };
        let g = GenerationBuilder::new(2, p).repartition(&base).unwrap();

        assert_eq!(g.id(), 2);
        assert_eq!(g.lexicon().resolve("cat"), None);
        assert_eq!(g.lexicon().resolve("dog"), Some(0));
        assert_eq!(g.postings().get(0).documents(), &[20]);
        assert_eq!(g.domains().document_count(), 1);
        g.verify().unwrap();
    }

    #[test]
    fn snapshot_restores_identical_generation() {
        let g = GenerationBuilder::new(4, Partitioning::All)
            .build(&sample())
            .unwrap();
        let back = IndexGeneration::from_snapshot(g.to_snapshot()).unwrap();
        assert_eq!(back.id(), 4);
        assert_eq!(back.lexicon().terms(), g.lexicon().terms());
        assert_eq!(back.postings().lists(), g.postings().lists());
        assert_eq!(back.domains().to_groups(), g.domains().to_groups());
        // 构建时间随快照保留
        assert_eq!(back.stats().built_at_ms, g.stats().built_at_ms);
        assert!(g.stats().built_at_ms > 0);
    }

    #[test]
    fn snapshot_with_orphan_posting_is_rejected() {
        let g = GenerationBuilder::new(1, Partitioning::All)
            .build(&sample())
            .unwrap();
        let mut snap = g.to_snapshot();
        snap.domains.retain(|(d, _)| *d != 2);
        let err = IndexGeneration::from_snapshot(snap).unwrap_err();
        assert!(matches!(err, IndexError::OrphanDocument { document: 20 }));
    }
}
