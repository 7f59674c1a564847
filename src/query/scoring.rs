use crate::core::{RankingMetadata, Score, WordFlags};

/// 打分策略：必须是纯函数（同输入同输出），且对词频单调不减。
///
/// `matched` 为该文档在每个查询词上的元数据（顺序与查询词一致）；
/// `anchor_hits` 为命中查询词的外链锚文本条数（未启用锚文本时为 0）。
pub trait Scorer: Send + Sync {
    fn score(&self, matched: &[RankingMetadata], anchor_hits: u32) -> Score;
}

/// 默认打分：词频线性加权 + 字段标记加成 + 锚文本加成，全部为整数饱和运算
#[derive(Clone, Debug)]
pub struct TermFrequencyScorer {
    pub tf_weight: Score,
    pub title_bonus: Score,
    pub heading_bonus: Score,
    pub url_bonus: Score,
    pub domain_bonus: Score,
    pub subject_bonus: Score,
    pub site_bonus: Score,
    pub anchor_bonus: Score,
}

impl Default for TermFrequencyScorer {
    fn default() -> Self {
        Self {
            tf_weight: 10,
            title_bonus: 25,
            heading_bonus: 10,
            url_bonus: 15,
            domain_bonus: 20,
            subject_bonus: 5,
            site_bonus: 5,
            anchor_bonus: 8,
        }
    }
}

impl TermFrequencyScorer {
    fn flag_bonus(&self, flags: WordFlags) -> Score {
        if flags.is_empty() {
            return 0;
        }
        [
            (WordFlags::TITLE, self.title_bonus),
            (WordFlags::HEADING, self.heading_bonus),
            (WordFlags::URL, self.url_bonus),
            (WordFlags::DOMAIN, self.domain_bonus),
            (WordFlags::SUBJECT, self.subject_bonus),
            (WordFlags::SITE, self.site_bonus),
        ]
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .fold(0, |acc: Score, (_, bonus)| acc.saturating_add(*bonus))
    }
}

impl Scorer for TermFrequencyScorer {
    fn score(&self, matched: &[RankingMetadata], anchor_hits: u32) -> Score {
        let mut total: Score = 0;
        for meta in matched {
            total = total
                .saturating_add((meta.term_frequency as Score).saturating_mul(self.tf_weight))
                .saturating_add(self.flag_bonus(meta.flags));
        }
        total.saturating_add((anchor_hits as Score).saturating_mul(self.anchor_bonus))
    }
}
