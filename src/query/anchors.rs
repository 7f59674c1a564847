use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{tokenize, DomainId};

/// 指向某个域名的外链
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorLink {
    pub url: String,
    pub text: String,
    /// 链接来源域名
    #[serde(default)]
    pub source: Option<DomainId>,
}

/// 锚文本查询：域名 -> 指向它的外链文本（外部存储，仅作打分输入）
pub trait AnchorSource: Send + Sync {
    fn anchor_links(&self, domain: DomainId) -> Vec<AnchorLink>;
}

/// 不提供任何锚文本
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAnchors;

impl AnchorSource for NoAnchors {
    fn anchor_links(&self, _domain: DomainId) -> Vec<AnchorLink> {
        Vec::new()
    }
}

/// 内存锚文本表（测试与小规模部署）
///
/// 文件格式为 JSON 对象：`{ "<domain id>": [AnchorLink, ...] }`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticAnchors {
    links: HashMap<DomainId, Vec<AnchorLink>>,
}

impl StaticAnchors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, domain: DomainId, link: AnchorLink) {
        self.links.entry(domain).or_default().push(link);
    }

    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        serde_json::from_str(s).context("parse anchors")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read anchors {}", path.display()))?;
        let anchors = Self::from_json_str(&raw)?;
        tracing::info!(
            "Loaded anchor texts for {} domains from {:?}",
            anchors.domain_count(),
            path
        );
        Ok(anchors)
    }

    pub fn domain_count(&self) -> usize {
        self.links.len()
    }
}

impl AnchorSource for StaticAnchors {
    fn anchor_links(&self, domain: DomainId) -> Vec<AnchorLink> {
        self.links.get(&domain).cloned().unwrap_or_default()
    }
}

/// 命中任一（已归一化）查询词的锚文本条数
pub fn anchor_hits(links: &[AnchorLink], terms: &[String]) -> u32 {
    if terms.is_empty() {
        return 0;
    }
    let hits = links
        .iter()
        .filter(|link| tokenize(&link.text).any(|tok| terms.iter().any(|t| *t == tok)))
        .count();
    u32::try_from(hits).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(text: &str) -> AnchorLink {
        AnchorLink {
            url: "https://example.org/".into(),
            text: text.into(),
            source: None,
        }
    }

    #[test]
    fn counts_links_mentioning_any_term() {
        let links = vec![link("Cute CAT pictures"), link("dogs"), link("cat and dog")];
        let terms = vec!["cat".to_string(), "dog".to_string()];
        assert_eq!(anchor_hits(&links, &terms), 2);
        assert_eq!(anchor_hits(&links, &[]), 0);
    }

    #[test]
    fn static_anchors_are_keyed_by_domain() {
        let mut a = StaticAnchors::new();
        a.insert(7, link("cat"));
        assert_eq!(a.anchor_links(7).len(), 1);
        assert!(a.anchor_links(8).is_empty());
        assert!(NoAnchors.anchor_links(7).is_empty());
    }

    #[test]
    fn json_file_keys_are_domain_ids() {
        let a = StaticAnchors::from_json_str(
            r#"{ "7": [ { "url": "https://pets.example/", "text": "cat pictures", "source": 3 } ],
                 "9": [] }"#,
        )
        .unwrap();
        assert_eq!(a.domain_count(), 2);
        assert_eq!(a.anchor_links(7)[0].source, Some(3));
        assert!(StaticAnchors::from_json_str(r#"{ "cat": [] }"#).is_err());
    }
}
