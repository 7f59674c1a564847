use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::{DocumentId, ExecutionStrategy, Posting, RankingMetadata, TermId};
use crate::error::{IndexError, Result};

static EMPTY: PostingsList = PostingsList {
    docs: Vec::new(),
    meta: Vec::new(),
};

/// 单个词项的 postings：按 DocumentId 严格递增。
///
/// 列式存储（docs / meta 分开）：求交只扫 docs，命中后再按下标取 meta。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingsList {
    docs: Vec<DocumentId>,
    meta: Vec<RankingMetadata>,
}

impl PostingsList {
    pub fn empty() -> &'static PostingsList {
        &EMPTY
    }

    /// 构造并校验递增性；`term_id` 仅用于诊断
    pub fn from_postings(term_id: TermId, postings: Vec<Posting>) -> Result<Self> {
        let list = Self::from_postings_unchecked(postings);
        list.check_ascending(term_id)?;
        Ok(list)
    }

    fn from_postings_unchecked(postings: Vec<Posting>) -> Self {
        let mut docs = Vec::with_capacity(postings.len());
        let mut meta = Vec::with_capacity(postings.len());
        for p in postings {
            docs.push(p.document);
            meta.push(p.meta);
        }
        Self { docs, meta }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn documents(&self) -> &[DocumentId] {
        &self.docs
    }

    pub fn meta_at(&self, idx: usize) -> Option<RankingMetadata> {
        self.meta.get(idx).copied()
    }

    pub fn find(&self, document: DocumentId) -> Option<RankingMetadata> {
        let idx = self.docs.binary_search(&document).ok()?;
        self.meta_at(idx)
    }

    /// 从 `from` 开始找第一个 `>= target` 的下标（倍增 + 二分）。
    /// 返回 `len()` 表示已越过末尾。
    pub fn seek(&self, from: usize, target: DocumentId) -> usize {
        let n = self.docs.len();
        if from >= n || self.docs[from] >= target {
            return from.min(n);
        }
        // 倍增找上界：docs[lo] < target
        let mut lo = from;
        let mut step = 1usize;
        let mut hi = from + step;
        while hi < n && self.docs[hi] < target {
            lo = hi;
            step *= 2;
            hi = lo + step;
        }
        let hi = hi.min(n);
        lo + 1 + self.docs[lo + 1..hi].partition_point(|d| *d < target)
    }

    pub fn is_strictly_ascending(&self) -> bool {
        self.docs.windows(2).all(|w| w[0] < w[1])
    }

    fn check_ascending(&self, term_id: TermId) -> Result<()> {
        match self.docs.windows(2).find(|w| w[0] >= w[1]) {
            Some(w) => Err(IndexError::UnsortedPostings {
                term_id,
                document: w[1],
            }),
            None => Ok(()),
        }
    }

    /// 过滤出子集（repartition 用）；保持顺序，因此仍然递增
    pub fn retain(&self, mut keep: impl FnMut(DocumentId) -> bool) -> Self {
        let mut out = Self::default();
        for (d, m) in self.docs.iter().zip(self.meta.iter()) {
            if keep(*d) {
                out.docs.push(*d);
                out.meta.push(*m);
            }
        }
        out.docs.shrink_to_fit();
        out.meta.shrink_to_fit();
        out
    }

    fn estimated_bytes(&self) -> u64 {
        use std::mem::size_of;
        self.docs.capacity() as u64 * size_of::<DocumentId>() as u64
            + self.meta.capacity() as u64 * size_of::<RankingMetadata>() as u64
    }
}

/// Postings 存储：按 TermId 下标的 postings 表，发布后不可变
#[derive(Clone, Debug, Default)]
pub struct PostingsStore {
    lists: Vec<PostingsList>,
}

impl PostingsStore {
    /// 直接装配（快照恢复 / repartition）；调用方负责随后 `verify`
    pub fn from_lists(lists: Vec<PostingsList>) -> Self {
        Self { lists }
    }

    /// 未知 TermId 返回空表
    pub fn get(&self, term_id: TermId) -> &PostingsList {
        self.lists
            .get(term_id as usize)
            .unwrap_or_else(|| PostingsList::empty())
    }

    pub fn term_count(&self) -> usize {
        self.lists.len()
    }

    pub fn total_postings(&self) -> usize {
        self.lists.iter().map(PostingsList::len).sum()
    }

    pub fn longest(&self) -> usize {
        self.lists.iter().map(PostingsList::len).max().unwrap_or(0)
    }

    pub fn lists(&self) -> &[PostingsList] {
        &self.lists
    }

    pub fn iter(&self) -> impl Iterator<Item = (TermId, &PostingsList)> {
        self.lists
            .iter()
            .enumerate()
            .map(|(i, l)| (i as TermId, l))
    }

    /// 每张表严格递增
    pub fn verify(&self) -> Result<()> {
        for (term_id, list) in self.iter() {
            list.check_ascending(term_id)?;
        }
        Ok(())
    }

    pub fn estimated_bytes(&self) -> u64 {
        use std::mem::size_of;
        self.lists.capacity() as u64 * size_of::<PostingsList>() as u64
            + self
                .lists
                .iter()
                .map(PostingsList::estimated_bytes)
                .sum::<u64>()
    }
}

/// 构建期的 postings 累积器
#[derive(Debug, Default)]
pub struct PostingsBuilder {
    lists: Vec<Vec<Posting>>,
}

impl PostingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条 posting。同一文档对同一词项的重复出现就地合并。
    pub fn push(&mut self, term_id: TermId, posting: Posting) {
        let idx = term_id as usize;
        if idx >= self.lists.len() {
            self.lists.resize_with(idx + 1, Vec::new);
        }
        let list = &mut self.lists[idx];
        match list.last_mut() {
            Some(last) if last.document == posting.document => {
                last.meta = last.meta.merge(posting.meta);
            }
            _ => list.push(posting),
        }
    }

    /// 排序 + 合并相邻重复 + 校验，产出不可变存储
    pub fn build(self, strategy: ExecutionStrategy) -> Result<PostingsStore> {
        let finish = |list: Vec<Posting>| -> PostingsList {
            let mut list = list;
            if !list.windows(2).all(|w| w[0].document < w[1].document) {
                list.sort_by_key(|p| p.document);
                list.dedup_by(|later, kept| {
                    if later.document == kept.document {
                        kept.meta = kept.meta.merge(later.meta);
                        true
                    } else {
                        false
                    }
                });
            }
            PostingsList::from_postings_unchecked(list)
        };

        let lists: Vec<PostingsList> = if strategy.is_parallel() {
            strategy.install(|| self.lists.into_par_iter().map(finish).collect())
        } else {
            self.lists.into_iter().map(finish).collect()
        };

        let store = PostingsStore { lists };
        store.verify()?;
        Ok(store)
    }
}
