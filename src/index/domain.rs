use std::collections::HashMap;

use roaring::RoaringTreemap;

use crate::core::{DocumentId, DomainId};

/// 一个站点下的文档集合
pub type DocumentSet = RoaringTreemap;

/// 域名索引：DomainId → 文档集合，以及反查 DocumentId → DomainId。
/// 与 postings 同一遍构建，作为同一代际的字段发布，两者不会跨代错位。
#[derive(Clone, Debug, Default)]
pub struct DomainIndex {
    sets: HashMap<DomainId, DocumentSet>,
    owners: HashMap<DocumentId, DomainId>,
}

impl DomainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 文档改投另一个域名时，从旧集合中摘除
    pub fn insert(&mut self, domain: DomainId, document: DocumentId) {
        if let Some(old) = self.owners.insert(document, domain) {
            if old != domain {
                if let Some(set) = self.sets.get_mut(&old) {
                    set.remove(document);
                    if set.is_empty() {
                        self.sets.remove(&old);
                    }
                }
            }
        }
        self.sets.entry(domain).or_default().insert(document);
    }

    pub fn documents_of(&self, domain: DomainId) -> Option<&DocumentSet> {
        self.sets.get(&domain)
    }

    pub fn domain_of(&self, document: DocumentId) -> Option<DomainId> {
        self.owners.get(&document).copied()
    }

    pub fn contains_document(&self, document: DocumentId) -> bool {
        self.owners.contains_key(&document)
    }

    pub fn domain_count(&self) -> usize {
        self.sets.len()
    }

    pub fn document_count(&self) -> usize {
        self.owners.len()
    }

    /// 按 (document, domain) 过滤出新索引
    pub fn retain(&self, mut keep: impl FnMut(DocumentId, DomainId) -> bool) -> Self {
        let mut out = Self::new();
        for (domain, doc) in self.entries() {
            if keep(doc, domain) {
                out.insert(domain, doc);
            }
        }
        out
    }

    /// 稳定顺序的 (domain, document) 列表：域名升序、文档升序
    pub fn entries(&self) -> impl Iterator<Item = (DomainId, DocumentId)> + '_ {
        let mut domains: Vec<DomainId> = self.sets.keys().copied().collect();
        domains.sort_unstable();
        domains.into_iter().flat_map(move |domain| {
            self.sets
                .get(&domain)
                .into_iter()
                .flat_map(|set| set.iter())
                .map(move |doc| (domain, doc))
        })
    }

    /// 快照用的紧凑形式
    pub fn to_groups(&self) -> Vec<(DomainId, Vec<DocumentId>)> {
        let mut groups: Vec<(DomainId, Vec<DocumentId>)> = self
            .sets
            .iter()
            .map(|(d, set)| (*d, set.iter().collect()))
            .collect();
        groups.sort_unstable_by_key(|(d, _)| *d);
        groups
    }

    pub fn from_groups(groups: Vec<(DomainId, Vec<DocumentId>)>) -> Self {
        let mut out = Self::new();
        for (domain, docs) in groups {
            for doc in docs {
                out.insert(domain, doc);
            }
        }
        out
    }

    pub fn estimated_bytes(&self) -> u64 {
        use std::mem::size_of;
        let sets: u64 = self
            .sets
            .values()
            .map(|s| s.serialized_size() as u64)
            .sum();
        let owners = self.owners.capacity() as u64 * (size_of::<(DocumentId, DomainId)>() as u64 + 8);
        sets + owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_both_directions() {
        let mut idx = DomainIndex::new();
        idx.insert(1, 10);
        idx.insert(1, 30);
        idx.insert(2, 20);

        let set = idx.documents_of(1).unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![10, 30]);
        assert_eq!(idx.domain_of(20), Some(2));
        assert_eq!(idx.domain_of(99), None);
        assert!(idx.documents_of(7).is_none());
        assert_eq!(idx.document_count(), 3);
    }

    #[test]
    fn reassignment_moves_document() {
        let mut idx = DomainIndex::new();
        idx.insert(1, 10);
        idx.insert(2, 10);
        assert!(idx.documents_of(1).is_none());
        assert_eq!(idx.domain_of(10), Some(2));
        assert_eq!(idx.domain_count(), 1);
    }

    #[test]
    fn groups_round_trip_and_retain() {
        let mut idx = DomainIndex::new();
        for (dom, doc) in [(3, 5), (1, 2), (1, 4), (3, 7)] {
            idx.insert(dom, doc);
        }
        let groups = idx.to_groups();
        assert_eq!(groups, vec![(1, vec![2, 4]), (3, vec![5, 7])]);

        let back = DomainIndex::from_groups(groups);
        assert_eq!(back.entries().collect::<Vec<_>>(), idx.entries().collect::<Vec<_>>());

        let odd = idx.retain(|doc, _| doc % 2 == 1);
        assert_eq!(odd.entries().collect::<Vec<_>>(), vec![(3, 5), (3, 7)]);
    }
}
