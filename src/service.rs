use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::IndexConfig;
use crate::core::{normalize_term, DomainId, Partitioning, TermId, WordsBatch};
use crate::error::{IndexError, Result};
use crate::index::{IndexControl, IndexGeneration, MaintenanceState, MaintenanceTicket, Staging};
use crate::query::{QueryEvaluator, QueryOptions, SearchResults, StaticAnchors, DEFAULT_LIMIT};
use crate::stats::IndexStats;
use crate::storage::{SnapshotStore, WordsJournal};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub terms: Vec<String>,
    #[serde(default)]
    pub options: Option<QueryOptions>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSearchRequest {
    pub terms: Vec<String>,
    pub domain: DomainId,
    #[serde(default)]
    pub options: Option<QueryOptions>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceStatus {
    pub initialized: bool,
    pub maintenance: MaintenanceState,
    pub staged_batches: usize,
    pub staged_documents: usize,
    pub index: IndexStats,
}

/// 索引服务门面：对外的全部逻辑操作。
///
/// 查询只读 `control.current()` pin 住的代际；写入只进 staging；
/// reindex/repartition 交给 `IndexControl` 在后台执行。
pub struct IndexService {
    control: Arc<IndexControl>,
    staging: Arc<Staging>,
    evaluator: QueryEvaluator,
    initialized: AtomicBool,
    default_limit: usize,
}

impl IndexService {
    /// 未初始化的服务：`initialize()` 之前维护操作一律拒绝
    pub fn new(control: IndexControl, staging: Staging) -> Self {
        Self {
            control: Arc::new(control),
            staging: Arc::new(staging),
            evaluator: QueryEvaluator::new(),
            initialized: AtomicBool::new(false),
            default_limit: DEFAULT_LIMIT,
        }
    }

    /// 纯内存服务（无日志、无快照），立即可用
    pub fn in_memory() -> Self {
        let service = Self::new(
            IndexControl::new(IndexGeneration::empty(0, Partitioning::All)),
            Staging::in_memory(),
        );
        service.initialize();
        service
    }

    /// 从数据目录启动：加载快照（若有效）+ 回放摄入日志 + 可选锚文本表
    pub fn open(config: &IndexConfig) -> anyhow::Result<Self> {
        config.partitioning.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let store = SnapshotStore::in_dir(&config.data_dir);
        let initial = if config.persist_snapshots {
            load_generation(&store, &config.partitioning)
        } else {
            IndexGeneration::empty(0, config.partitioning.clone())
        };
        if initial.partitioning() != &config.partitioning {
            tracing::warn!(
                "Loaded generation is partitioned as [{}] but config says [{}]; run ops/repartition to apply",
                initial.partitioning(),
                config.partitioning
            );
        }

        let mut control = IndexControl::new(initial);
        if config.persist_snapshots {
            control = control.with_store(store);
        }
        let staging = Staging::with_journal(WordsJournal::open_in_dir(&config.data_dir)?)?;

        let mut service = Self::new(control, staging).with_default_limit(config.default_limit);
        if let Some(path) = &config.anchors_path {
            let anchors = StaticAnchors::load(path)?;
            service = service.with_evaluator(QueryEvaluator::new().with_anchors(anchors));
        }
        service.initialize();
        Ok(service)
    }

    pub fn with_evaluator(mut self, evaluator: QueryEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn initialize(&self) {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            tracing::info!(
                "Index service initialized at generation {}",
                self.control.current().id()
            );
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn control(&self) -> &Arc<IndexControl> {
        &self.control
    }

    pub fn default_options(&self) -> QueryOptions {
        QueryOptions {
            limit: self.default_limit,
            use_anchors: false,
        }
    }

    /// PUT words：校验形状后写日志 + staging，下一次 reindex 生效
    pub fn put_words(&self, batch: WordsBatch) -> Result<()> {
        batch.validate()?;
        let (id, docs) = (batch.batch_id, batch.len());
        self.staging.push(batch)?;
        tracing::debug!("Staged words batch {} ({} documents)", id, docs);
        Ok(())
    }

    pub fn search(&self, terms: &[String], options: Option<&QueryOptions>) -> SearchResults {
        self.run_query(terms, None, options)
    }

    pub fn search_domain(
        &self,
        terms: &[String],
        domain: DomainId,
        options: Option<&QueryOptions>,
    ) -> SearchResults {
        self.run_query(terms, Some(domain), options)
    }

    fn run_query(
        &self,
        terms: &[String],
        domain: Option<DomainId>,
        options: Option<&QueryOptions>,
    ) -> SearchResults {
        let generation = self.control.current();
        match options {
            Some(opts) => self.evaluator.evaluate(&generation, terms, domain, opts),
            None => self
                .evaluator
                .evaluate(&generation, terms, domain, &self.default_options()),
        }
    }

    pub fn term_id(&self, term: &str) -> Option<TermId> {
        let term = normalize_term(term)?;
        self.control.current().lexicon().resolve(&term)
    }

    /// 后台重建；构建成功后把本次消费的批次压缩成一批（日志同步重写）
    pub fn reindex(&self) -> Result<MaintenanceTicket> {
        self.ensure_initialized()?;
        let batches = self.staging.snapshot();
        let consumed = batches.clone();
        let staging = Arc::clone(&self.staging);
        self.control.reindex_with(batches, move || {
            if let Err(e) = staging.compact(&consumed) {
                tracing::warn!("Staging compaction failed, keeping batches as-is: {}", e);
            }
        })
    }

    pub fn repartition(&self, partitioning: Partitioning) -> Result<MaintenanceTicket> {
        self.ensure_initialized()?;
        self.control.repartition(partitioning)
    }

    /// 忙（维护中）或尚未初始化
    pub fn is_blocked(&self) -> bool {
        !self.is_initialized() || self.control.is_busy()
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            initialized: self.is_initialized(),
            maintenance: self.control.state(),
            staged_batches: self.staging.batch_count(),
            staged_documents: self.staging.document_count(),
            index: self.control.current().stats(),
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(IndexError::NotInitialized)
        }
    }
}

fn load_generation(store: &SnapshotStore, partitioning: &Partitioning) -> IndexGeneration {
    let snap = match store.load_if_valid() {
        Ok(Some(snap)) => snap,
        Ok(None) => return IndexGeneration::empty(0, partitioning.clone()),
        Err(e) => {
            tracing::warn!("Snapshot unreadable, starting empty: {:#}", e);
            return IndexGeneration::empty(0, partitioning.clone());
        }
    };
    let id = snap.id;
    match IndexGeneration::from_snapshot(snap) {
        Ok(generation) => {
            tracing::info!("Loaded generation {} from {:?}", id, store.path());
            generation
        }
        Err(e) => {
            // 代际号仍然沿用，保证单调
            tracing::warn!("Snapshot of generation {} failed verification: {}", id, e);
            IndexGeneration::empty(id, partitioning.clone())
        }
    }
}
