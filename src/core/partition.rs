use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::types::{DocumentId, DomainId};
use crate::error::{IndexError, Result};

/// 分区键：按文档还是按站点切分
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKey {
    Document,
    Domain,
}

/// 本实例负责的分区。
///
/// repartition 只做本地过滤：不属于本实例的文档被丢弃，
/// 数据搬迁由外部负责。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partitioning {
    /// 不切分：持有全部文档
    #[default]
    All,
    /// `key % count == instance`
    Modulo {
        key: PartitionKey,
        count: u32,
        instance: u32,
    },
    /// `xxh3(key) % count == instance`：key 分布不均时使用
    Hashed {
        key: PartitionKey,
        count: u32,
        instance: u32,
    },
    /// DocumentId ∈ [start, end)
    Range { start: DocumentId, end: DocumentId },
}

impl Partitioning {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Partitioning::All => Ok(()),
            Partitioning::Modulo {
                count, instance, ..
            }
            | Partitioning::Hashed {
                count, instance, ..
            } => {
                if count == 0 {
                    return Err(IndexError::InvalidPartitioning(
                        "partition count must be positive".into(),
                    ));
                }
                if instance >= count {
                    return Err(IndexError::InvalidPartitioning(format!(
                        "instance {} out of range for {} partitions",
                        instance, count
                    )));
                }
                Ok(())
            }
            Partitioning::Range { start, end } => {
                if start >= end {
                    return Err(IndexError::InvalidPartitioning(format!(
                        "empty document range [{}, {})",
                        start, end
                    )));
                }
                Ok(())
            }
        }
    }

    /// 文档是否归属本实例
    pub fn assigns(&self, document: DocumentId, domain: DomainId) -> bool {
        match *self {
            Partitioning::All => true,
            Partitioning::Modulo {
                key,
                count,
                instance,
            } => count > 0 && key_value(key, document, domain) % count as u64 == instance as u64,
            Partitioning::Hashed {
                key,
                count,
                instance,
            } => {
                let v = key_value(key, document, domain);
                count > 0
                    && xxhash_rust::xxh3::xxh3_64(&v.to_le_bytes()) % count as u64
                        == instance as u64
            }
            Partitioning::Range { start, end } => document >= start && document < end,
        }
    }
}

fn key_value(key: PartitionKey, document: DocumentId, domain: DomainId) -> u64 {
    match key {
        PartitionKey::Document => document,
        PartitionKey::Domain => domain as u64,
    }
}

impl fmt::Display for Partitioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partitioning::All => write!(f, "all"),
            Partitioning::Modulo {
                key,
                count,
                instance,
            } => write!(f, "{:?} % {} == {}", key, count, instance),
            Partitioning::Hashed {
                key,
                count,
                instance,
            } => write!(f, "xxh3({:?}) % {} == {}", key, count, instance),
            Partitioning::Range { start, end } => write!(f, "document in [{}, {})", start, end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modulo_by_document_keeps_even_ids() {
        let p = Partitioning::Modulo {
            key: PartitionKey::Document,
            count: 2,
            instance: 0,
        };
        assert!(p.assigns(10, 1));
        assert!(p.assigns(20, 1));
        assert!(!p.assigns(31, 1));
    }

    #[test]
    fn domain_key_ignores_document() {
        let p = Partitioning::Modulo {
            key: PartitionKey::Domain,
            count: 3,
            instance: 1,
        };
        assert!(p.assigns(2, 4));
        assert!(!p.assigns(1, 3));
    }

    #[test]
    fn hashed_partitions_cover_every_document_once() {
        let parts: Vec<Partitioning> = (0..4)
            .map(|instance| Partitioning::Hashed {
                key: PartitionKey::Document,
                count: 4,
                instance,
            })
            .collect();
        for doc in 0..500u64 {
            let owners = parts.iter().filter(|p| p.assigns(doc, 0)).count();
            assert_eq!(owners, 1, "document {} owned by {} partitions", doc, owners);
        }
    }

    #[test]
    fn invalid_schemes_are_rejected() {
        let zero = Partitioning::Modulo {
            key: PartitionKey::Document,
            count: 0,
            instance: 0,
        };
        assert!(zero.validate().is_err());
        let out_of_range = Partitioning::Hashed {
            key: PartitionKey::Domain,
            count: 2,
            instance: 2,
        };
        assert!(out_of_range.validate().is_err());
        assert!(Partitioning::Range { start: 5, end: 5 }.validate().is_err());
        assert!(Partitioning::Range { start: 0, end: 5 }.validate().is_ok());
    }

    #[test]
    fn json_shape() {
        let p: Partitioning = serde_json::from_str(
            r#"{"modulo":{"key":"document","count":2,"instance":0}}"#,
        )
        .unwrap();
        assert_eq!(
            p,
            Partitioning::Modulo {
                key: PartitionKey::Document,
                count: 2,
                instance: 0
            }
        );
        let all: Partitioning = serde_json::from_str(r#""all""#).unwrap();
        assert_eq!(all, Partitioning::All);
    }
}
