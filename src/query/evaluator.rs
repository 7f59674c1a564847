use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{normalize_term, DocumentId, DomainId, RankingMetadata, Score};
use crate::index::{IndexGeneration, PostingsList};
use crate::query::anchors::{anchor_hits, AnchorSource, NoAnchors};
use crate::query::scoring::{Scorer, TermFrequencyScorer};

pub const DEFAULT_LIMIT: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// 0 = 不截断
    pub limit: usize,
    pub use_anchors: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            use_anchors: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: DocumentId,
    pub score: Score,
}

/// 查询结果；`generation` 标记结果来自哪一代索引
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    pub generation: u64,
    pub hits: Vec<SearchHit>,
}

impl SearchResults {
    fn empty(generation: u64) -> Self {
        Self {
            generation,
            hits: Vec::new(),
        }
    }

    pub fn documents(&self) -> Vec<DocumentId> {
        self.hits.iter().map(|h| h.document).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// AND 查询求值：只读一个已 pin 住的代际，无副作用
pub struct QueryEvaluator {
    scorer: Arc<dyn Scorer>,
    anchors: Arc<dyn AnchorSource>,
}

impl Default for QueryEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryEvaluator {
    pub fn new() -> Self {
        Self {
            scorer: Arc::new(TermFrequencyScorer::default()),
            anchors: Arc::new(NoAnchors),
        }
    }

    pub fn with_scorer(mut self, scorer: impl Scorer + 'static) -> Self {
        self.scorer = Arc::new(scorer);
        self
    }

    pub fn with_anchors(mut self, anchors: impl AnchorSource + 'static) -> Self {
        self.anchors = Arc::new(anchors);
        self
    }

    pub fn evaluate(
        &self,
        generation: &IndexGeneration,
        terms: &[String],
        domain: Option<DomainId>,
        options: &QueryOptions,
    ) -> SearchResults {
        let gid = generation.id();

        // 归一化 + 去重（保留首次出现顺序）
        let mut normalized: Vec<String> = Vec::with_capacity(terms.len());
        for t in terms.iter().filter_map(|t| normalize_term(t)) {
            if !normalized.contains(&t) {
                normalized.push(t);
            }
        }
        if normalized.is_empty() {
            return SearchResults::empty(gid);
        }

        let mut lists: Vec<(usize, &PostingsList)> = Vec::with_capacity(normalized.len());
        for (slot, term) in normalized.iter().enumerate() {
            let Some(id) = generation.lexicon().resolve(term) else {
                tracing::debug!("query term {:?} not in generation {}", term, gid);
                return SearchResults::empty(gid);
            };
            let list = generation.postings().get(id);
            if list.is_empty() {
                return SearchResults::empty(gid);
            }
            lists.push((slot, list));
        }

        let scope = match domain {
            Some(d) => match generation.domains().documents_of(d) {
                Some(set) => Some(set),
                None => return SearchResults::empty(gid),
            },
            None => None,
        };

        // 最短的表驱动，其余表用游标倍增探测
        lists.sort_by_key(|(_, l)| l.len());
        let (driver_slot, driver) = lists[0];
        let followers = &lists[1..];
        let mut cursors = vec![0usize; followers.len()];
        let mut matched = vec![RankingMetadata::default(); lists.len()];
        let mut anchor_cache: HashMap<DomainId, u32> = HashMap::new();
        let mut hits = Vec::new();

        'driver: for (i, &doc) in driver.documents().iter().enumerate() {
            if let Some(set) = scope {
                if !set.contains(doc) {
                    continue;
                }
            }
            for (p, (slot, list)) in followers.iter().enumerate() {
                let pos = list.seek(cursors[p], doc);
                cursors[p] = pos;
                if pos >= list.len() {
                    break 'driver;
                }
                if list.documents()[pos] != doc {
                    continue 'driver;
                }
                matched[*slot] = list.meta_at(pos).unwrap_or_default();
            }
            matched[driver_slot] = driver.meta_at(i).unwrap_or_default();

            let anchors = if options.use_anchors {
                match generation.domains().domain_of(doc) {
                    Some(owner) => *anchor_cache.entry(owner).or_insert_with(|| {
                        anchor_hits(&self.anchors.anchor_links(owner), &normalized)
                    }),
                    None => 0,
                }
            } else {
                0
            };

            hits.push(SearchHit {
                document: doc,
                score: self.scorer.score(&matched, anchors),
            });
        }

        hits.sort_unstable_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.document.cmp(&b.document))
        });
        if options.limit > 0 {
            hits.truncate(options.limit);
        }

        tracing::debug!(
            "query {:?} domain={:?} generation={} hits={}",
            normalized,
            domain,
            gid,
            hits.len()
        );
        SearchResults {
            generation: gid,
            hits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DocumentRecord, Partitioning, WordFlags, WordsBatch};
    use crate::index::GenerationBuilder;
    use crate::query::anchors::{AnchorLink, StaticAnchors};

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|t| t.to_string()).collect()
    }

    /// cat → [(10, tf=2), (30, tf=1)]; dog → [(10, tf=1), (20, tf=3)]
    fn cat_dog() -> IndexGeneration {
        let batch = WordsBatch::new(
            1,
            vec![
                DocumentRecord::new(10, 1)
                    .word("cat", RankingMetadata::new(2))
                    .word("dog", RankingMetadata::new(1)),
                DocumentRecord::new(20, 2).word("dog", RankingMetadata::new(3)),
                DocumentRecord::new(30, 1).word("cat", RankingMetadata::new(1)),
            ],
        );
        GenerationBuilder::new(1, Partitioning::All)
            .build(&[Arc::new(batch)])
            .unwrap()
    }

    #[test]
    fn and_query_intersects() {
        let g = cat_dog();
        let q = QueryEvaluator::new();
        let r = q.evaluate(&g, &s(&["cat", "dog"]), None, &QueryOptions::default());
        assert_eq!(r.generation, 1);
        assert_eq!(
            r.hits,
            vec![SearchHit {
                document: 10,
                score: 30
            }]
        );
    }

    #[test]
    fn domain_restriction() {
        let g = cat_dog();
        let q = QueryEvaluator::new();
        let opts = QueryOptions::default();
        assert!(q.evaluate(&g, &s(&["cat", "dog"]), Some(2), &opts).is_empty());
        assert_eq!(
            q.evaluate(&g, &s(&["cat"]), Some(1), &opts).documents(),
            vec![10, 30]
        );
        assert!(q.evaluate(&g, &s(&["cat"]), Some(999), &opts).is_empty());
    }

    #[test]
    fn empty_and_missing_terms_yield_nothing() {
        let g = cat_dog();
        let q = QueryEvaluator::new();
        let opts = QueryOptions::default();
        assert!(q.evaluate(&g, &[], None, &opts).is_empty());
        assert!(q.evaluate(&g, &s(&["  "]), None, &opts).is_empty());
        assert!(q.evaluate(&g, &s(&["cat", "bird"]), None, &opts).is_empty());
    }

    #[test]
    fn duplicate_and_differently_cased_terms_collapse() {
        let g = cat_dog();
        let q = QueryEvaluator::new();
        let opts = QueryOptions::default();
        let once = q.evaluate(&g, &s(&["cat"]), None, &opts);
        let twice = q.evaluate(&g, &s(&["cat", " CAT", "Cat"]), None, &opts);
        assert_eq!(once, twice);
    }

    #[test]
    fn ordering_is_score_desc_then_document_asc() {
        let batch = WordsBatch::new(
            1,
            vec![
                DocumentRecord::new(1, 1).word("x", RankingMetadata::new(1)),
                DocumentRecord::new(2, 1).word("x", RankingMetadata::new(5)),
                DocumentRecord::new(3, 1).word("x", RankingMetadata::new(1)),
                DocumentRecord::new(4, 1)
                    .word("x", RankingMetadata::new(1).with_flags(WordFlags::TITLE)),
            ],
        );
        let g = GenerationBuilder::new(1, Partitioning::All)
            .build(&[Arc::new(batch)])
            .unwrap();
        let q = QueryEvaluator::new();
        let r = q.evaluate(&g, &s(&["x"]), None, &QueryOptions::default());
        assert_eq!(r.documents(), vec![2, 4, 1, 3]);
        assert_eq!(r, q.evaluate(&g, &s(&["x"]), None, &QueryOptions::default()));

        let limited = q.evaluate(
            &g,
            &s(&["x"]),
            None,
            &QueryOptions {
                limit: 2,
                use_anchors: false,
            },
        );
        assert_eq!(limited.documents(), vec![2, 4]);
    }

    #[test]
    fn zero_limit_means_unlimited() {
        let records = (0..250u64)
            .map(|d| DocumentRecord::new(d, 1).word("x", RankingMetadata::new(1)))
            .collect();
        let g = GenerationBuilder::new(1, Partitioning::All)
            .build(&[Arc::new(WordsBatch::new(1, records))])
            .unwrap();
        let q = QueryEvaluator::new();
        assert_eq!(
            q.evaluate(&g, &s(&["x"]), None, &QueryOptions::default()).hits.len(),
            DEFAULT_LIMIT
        );
        let all = QueryOptions {
            limit: 0,
            use_anchors: false,
        };
        assert_eq!(q.evaluate(&g, &s(&["x"]), None, &all).hits.len(), 250);
    }

    #[test]
    fn anchors_only_apply_when_requested() {
        let g = cat_dog();
        let mut anchors = StaticAnchors::new();
        anchors.insert(
            1,
            AnchorLink {
                url: "https://pets.example/".into(),
                text: "best cat site".into(),
                source: Some(9),
            },
        );
        let q = QueryEvaluator::new().with_anchors(anchors);
        let plain = q.evaluate(&g, &s(&["cat"]), None, &QueryOptions::default());
        let boosted = q.evaluate(
            &g,
            &s(&["cat"]),
            None,
            &QueryOptions {
                limit: 100,
                use_anchors: true,
            },
        );
        assert_eq!(plain.hits[0].score + 8, boosted.hits[0].score);
    }
}
