use std::collections::HashMap;

use crate::core::TermId;
use crate::error::{IndexError, Result};

/// 词典：Term ↔ TermId 双向映射（代际内为双射）
///
/// ID 按首次 intern 的顺序稠密分配，只在本代际有效。
#[derive(Clone, Debug, Default)]
pub struct Lexicon {
    ids: HashMap<String, TermId>,
    terms: Vec<String>,
}

impl Lexicon {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从快照的词项表恢复；重复词项视为数据损坏
    pub fn from_terms(terms: Vec<String>) -> Result<Self> {
        let mut ids = HashMap::with_capacity(terms.len());
        for (i, term) in terms.iter().enumerate() {
            if let Some(first) = ids.insert(term.clone(), i as TermId) {
                return Err(IndexError::DuplicateTerm {
                    term: term.clone(),
                    first,
                    second: i as TermId,
                });
            }
        }
        Ok(Self { ids, terms })
    }

    pub fn resolve(&self, term: &str) -> Option<TermId> {
        self.ids.get(term).copied()
    }

    /// 写路径：仅在构建新代际时调用
    pub fn intern(&mut self, term: &str) -> TermId {
        if let Some(id) = self.ids.get(term) {
            return *id;
        }
        let id = self.terms.len() as TermId;
        self.terms.push(term.to_owned());
        self.ids.insert(term.to_owned(), id);
        id
    }

    pub fn term(&self, id: TermId) -> Option<&str> {
        self.terms.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TermId, &str)> {
        self.terms
            .iter()
            .enumerate()
            .map(|(i, t)| (i as TermId, t.as_str()))
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// 双射校验：正反两张表一一对应
    pub fn verify(&self) -> Result<()> {
        if self.ids.len() != self.terms.len() {
            // 反查第一个冲突词项，给出可定位的诊断
            let mut seen: HashMap<&str, TermId> = HashMap::with_capacity(self.terms.len());
            for (id, term) in self.iter() {
                if let Some(first) = seen.insert(term, id) {
                    return Err(IndexError::DuplicateTerm {
                        term: term.to_owned(),
                        first,
                        second: id,
                    });
                }
            }
        }
        for (id, term) in self.iter() {
            match self.ids.get(term) {
                Some(&mapped) if mapped == id => {}
                Some(&mapped) => {
                    return Err(IndexError::DuplicateTerm {
                        term: term.to_owned(),
                        first: mapped,
                        second: id,
                    })
                }
                None => {
                    return Err(IndexError::DuplicateTerm {
                        term: term.to_owned(),
                        first: id,
                        second: id,
                    })
                }
            }
        }
        Ok(())
    }

    /// 粗估堆占用（字节）
    pub fn estimated_bytes(&self) -> u64 {
        use std::mem::size_of;
        let text: u64 = self.terms.iter().map(|t| t.capacity() as u64).sum();
        let vec = self.terms.capacity() as u64 * size_of::<String>() as u64;
        let map = self.ids.capacity() as u64 * (size_of::<(String, TermId)>() as u64 + 8);
        // map 的 key 是第二份拷贝
        text * 2 + vec + map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_in_insertion_order() {
        let mut lex = Lexicon::new();
        assert_eq!(lex.intern("cat"), 0);
        assert_eq!(lex.intern("dog"), 1);
        assert_eq!(lex.intern("cat"), 0);
        assert_eq!(lex.len(), 2);
        assert_eq!(lex.resolve("dog"), Some(1));
        assert_eq!(lex.resolve("bird"), None);
        assert_eq!(lex.term(1), Some("dog"));
        assert_eq!(lex.term(2), None);
        assert!(lex.verify().is_ok());
    }

    #[test]
    fn from_terms_rejects_duplicates() {
        let err = Lexicon::from_terms(vec!["a".into(), "b".into(), "a".into()]).unwrap_err();
        match err {
            IndexError::DuplicateTerm {
                term,
                first,
                second,
            } => {
                assert_eq!(term, "a");
                assert_eq!((first, second), (0, 2));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn from_terms_round_trips_ids() {
        let lex = Lexicon::from_terms(vec!["x".into(), "y".into()]).unwrap();
        assert_eq!(lex.resolve("y"), Some(1));
        assert_eq!(lex.iter().collect::<Vec<_>>(), vec![(0, "x"), (1, "y")]);
    }
}
