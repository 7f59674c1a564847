use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::core::{PartitionKey, Partitioning};
use crate::query::DEFAULT_LIMIT;

pub const DEFAULT_PORT: u16 = 6060;

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("edge-index")
}

/// 服务配置：可选 TOML 文件 + 命令行覆盖
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    /// 请求未携带 options 时的结果条数上限
    pub default_limit: usize,
    /// 新代际发布前是否落盘快照
    pub persist_snapshots: bool,
    pub partitioning: Partitioning,
    /// 周期性统计日志间隔；0 关闭
    pub stats_interval_secs: u64,
    /// 锚文本 JSON 文件；未配置时锚文本打分恒为 0
    pub anchors_path: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            default_limit: DEFAULT_LIMIT,
            persist_snapshots: true,
            partitioning: Partitioning::All,
            stats_interval_secs: 300,
            anchors_path: None,
        }
    }
}

impl IndexConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let cfg: Self = toml::from_str(s).context("parse config")?;
        cfg.partitioning.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "edge-index",
    about = "Generation-swapped inverted index service",
    version
)]
pub struct Cli {
    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory for the words journal and generation snapshot
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Do not write generation snapshots
    #[arg(long)]
    pub no_snapshot: bool,

    /// Anchor text JSON file used for anchor scoring
    #[arg(long)]
    pub anchors: Option<PathBuf>,

    /// Number of partitions (document id modulo); requires --partition-instance
    #[arg(long, requires = "partition_instance")]
    pub partition_count: Option<u32>,

    /// Partition served by this instance
    #[arg(long, requires = "partition_count")]
    pub partition_instance: Option<u32>,
}

impl Cli {
    /// 文件配置（若有）叠加命令行参数
    pub fn into_config(self) -> anyhow::Result<IndexConfig> {
        let mut cfg = match &self.config {
            Some(path) => IndexConfig::load(path)?,
            None => IndexConfig::default(),
        };
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(dir) = self.data_dir {
            cfg.data_dir = dir;
        }
        if self.no_snapshot {
            cfg.persist_snapshots = false;
        }
        if let Some(path) = self.anchors {
            cfg.anchors_path = Some(path);
        }
        if let (Some(count), Some(instance)) = (self.partition_count, self.partition_instance) {
            cfg.partitioning = Partitioning::Modulo {
                key: PartitionKey::Document,
                count,
                instance,
            };
        }
        cfg.partitioning.validate()?;
        Ok(cfg)
    }
}
