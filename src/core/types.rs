use serde::{Deserialize, Serialize};
use std::ops::BitOr;

/// 词项 ID：仅在单个代际内有效（跨代际不可缓存）
pub type TermId = u32;
/// 文档 ID：上游转换流水线分配，索引视为不透明的可排序 key
pub type DocumentId = u64;
/// 站点（域名）ID
pub type DomainId = u32;
/// 排序分值：整数，保证同输入同输出
pub type Score = u64;

/// 词项出现位置/字段标记（位集合）
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WordFlags(pub u8);

impl WordFlags {
    pub const NONE: Self = Self(0);
    pub const TITLE: Self = Self(1 << 0);
    pub const HEADING: Self = Self(1 << 1);
    pub const URL: Self = Self(1 << 2);
    pub const DOMAIN: Self = Self(1 << 3);
    pub const SUBJECT: Self = Self(1 << 4);
    pub const SITE: Self = Self(1 << 5);

    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for WordFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// 每个 posting 携带的定长排序元数据：打分时无需回读原文
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingMetadata {
    pub term_frequency: u32,
    #[serde(default)]
    pub flags: WordFlags,
}

impl RankingMetadata {
    pub fn new(term_frequency: u32) -> Self {
        Self {
            term_frequency,
            flags: WordFlags::NONE,
        }
    }

    pub fn with_flags(mut self, flags: WordFlags) -> Self {
        self.flags = flags;
        self
    }

    /// 同一文档内重复出现的词项：频次累加、标记合并
    pub fn merge(self, other: Self) -> Self {
        Self {
            term_frequency: self.term_frequency.saturating_add(other.term_frequency),
            flags: self.flags | other.flags,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub document: DocumentId,
    pub meta: RankingMetadata,
}

impl Posting {
    pub fn new(document: DocumentId, meta: RankingMetadata) -> Self {
        Self { document, meta }
    }
}
