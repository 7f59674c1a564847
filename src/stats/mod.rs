use serde::Serialize;
use std::fmt;

/// 单个代际的规模与内存占用（估算值，偏保守）
#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexStats {
    pub generation: u64,
    /// 代际构建完成时间（Unix 毫秒）
    pub built_at_ms: u64,
    /// 词典词项数
    pub terms: usize,
    /// 所有 postings 表的条目总数
    pub postings_total: usize,
    /// 最长 postings 表长度（高频词）
    pub longest_postings: usize,
    pub documents: usize,
    pub domains: usize,
    pub lexicon_bytes: u64,
    pub postings_bytes: u64,
    pub domain_bytes: u64,
    /// 进程级 RSS（从 /proc/self/statm 读取）
    pub process_rss_bytes: u64,
}

impl IndexStats {
    pub fn estimated_bytes(&self) -> u64 {
        self.lexicon_bytes + self.postings_bytes + self.domain_bytes
    }

    /// 从 /proc/self/statm 读取进程 RSS
    pub fn read_process_rss() -> u64 {
        std::fs::read_to_string("/proc/self/statm")
            .ok()
            .and_then(|s| {
                // statm 格式: size resident shared text lib data dt (单位: 页)
                let parts: Vec<&str> = s.split_whitespace().collect();
                parts.get(1)?.parse::<u64>().ok()
            })
            .map(|pages| pages * 4096) // x86_64 page size
            .unwrap_or(0)
    }
}

pub fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║           edge-index Generation Report           ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║ Generation:     {:>10}                       ║", self.generation)?;
        writeln!(f, "║ Built at (ms):  {:>16}                 ║", self.built_at_ms)?;
        writeln!(
            f,
            "║ Process RSS:    {:>10}                       ║",
            human_bytes(self.process_rss_bytes)
        )?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(
            f,
            "║   terms:        {:>10}  ({:>10})          ║",
            self.terms,
            human_bytes(self.lexicon_bytes)
        )?;
        writeln!(
            f,
            "║   postings:     {:>10}  ({:>10})          ║",
            self.postings_total,
            human_bytes(self.postings_bytes)
        )?;
        writeln!(
            f,
            "║   longest list: {:>10}                       ║",
            self.longest_postings
        )?;
        writeln!(
            f,
            "║   documents:    {:>10}                       ║",
            self.documents
        )?;
        writeln!(
            f,
            "║   domains:      {:>10}  ({:>10})          ║",
            self.domains,
            human_bytes(self.domain_bytes)
        )?;
        writeln!(
            f,
            "║   total:        {:>10}                       ║",
            human_bytes(self.estimated_bytes())
        )?;
        writeln!(f, "╚══════════════════════════════════════════════════╝")?;
        Ok(())
    }
}
