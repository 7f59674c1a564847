use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::core::{AdaptiveScheduler, ExecutionStrategy, Partitioning, Task, WordsBatch};
use crate::error::{IndexError, Result};
use crate::index::generation::{GenerationBuilder, IndexGeneration};
use crate::storage::SnapshotStore;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Reindex,
    Repartition,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Reindex => f.write_str("reindex"),
            Operation::Repartition => f.write_str("repartition"),
        }
    }
}

/// 维护状态：只由维护任务写，由状态查询读
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MaintenanceState {
    Ready,
    Building {
        operation: Operation,
        target_generation: u64,
        started_at_ms: u64,
    },
    /// 上一次维护失败；门控上等同 Ready
    Failed { operation: Operation, reason: String },
}

/// 触发维护后的立即回执（任务在后台运行）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceTicket {
    pub operation: Operation,
    pub base_generation: u64,
    pub target_generation: u64,
}

#[cfg(feature = "mimalloc")]
fn maybe_trim_rss() {
    // mimalloc 作为全局分配器时，glibc 的 malloc_trim 无效，需要调用 mimalloc 自己的回收。
    extern "C" {
        fn mi_collect(force: bool);
    }
    unsafe { mi_collect(true) };
}

#[cfg(all(not(feature = "mimalloc"), target_os = "linux", target_env = "gnu"))]
fn maybe_trim_rss() {
    // glibc malloc 的主动回吐：旧代际释放后把空闲块还给 OS。
    unsafe {
        libc::malloc_trim(0);
    }
}

#[cfg(all(
    not(feature = "mimalloc"),
    not(all(target_os = "linux", target_env = "gnu"))
))]
fn maybe_trim_rss() {}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// 维护控制器：持有"当前代际"指针与维护状态机。
///
/// - 查询：`current()` 一次性 pin 住代际，整个查询只读这一代
/// - 维护：同一时刻至多一个 reindex/repartition，在后台线程旁路构建，
///   校验 + 快照暂存后，在状态锁内提交快照并以单次 `ArcSwap` 指针替换发布
/// - 任何失败（数据缺陷、IO、abort、panic）都不触碰当前代际与磁盘上的快照
pub struct IndexControl {
    current: ArcSwap<IndexGeneration>,
    state: Mutex<MaintenanceState>,
    idle: Condvar,
    abort_requested: AtomicBool,
    next_generation: AtomicU64,
    scheduler: Mutex<AdaptiveScheduler>,
    store: Option<SnapshotStore>,
}

impl IndexControl {
    pub fn new(initial: IndexGeneration) -> Self {
        let next = initial.id() + 1;
        Self {
            current: ArcSwap::from_pointee(initial),
            state: Mutex::new(MaintenanceState::Ready),
            idle: Condvar::new(),
            abort_requested: AtomicBool::new(false),
            next_generation: AtomicU64::new(next),
            scheduler: Mutex::new(AdaptiveScheduler::new()),
            store: None,
        }
    }

    /// 新代际在发布前先原子落盘
    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn current(&self) -> Arc<IndexGeneration> {
        self.current.load_full()
    }

    pub fn state(&self) -> MaintenanceState {
        self.state.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        matches!(*self.state.lock(), MaintenanceState::Building { .. })
    }

    /// 请求中止进行中的维护；返回是否确有任务在跑。
    /// 返回 true 时该任务一定不会发布：提交点与这里持同一把状态锁。
    pub fn request_abort(&self) -> bool {
        let st = self.state.lock();
        if matches!(*st, MaintenanceState::Building { .. }) {
            self.abort_requested.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// 阻塞等待维护结束；超时返回 false
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        while matches!(*st, MaintenanceState::Building { .. }) {
            if self.idle.wait_until(&mut st, deadline).timed_out() {
                return !matches!(*st, MaintenanceState::Building { .. });
            }
        }
        true
    }

    /// 后台 reindex：用给定批次在当前分区方案下重建
    pub fn reindex(self: &Arc<Self>, batches: Vec<Arc<WordsBatch>>) -> Result<MaintenanceTicket> {
        self.reindex_with(batches, || {})
    }

    /// 同 `reindex`，构建成功后（提交前）在维护线程上调用 `on_built`
    pub fn reindex_with<F>(
        self: &Arc<Self>,
        batches: Vec<Arc<WordsBatch>>,
        on_built: F,
    ) -> Result<MaintenanceTicket>
    where
        F: FnOnce() + Send + 'static,
    {
        let documents: usize = batches.iter().map(|b| b.len()).sum();
        self.spawn(Operation::Reindex, move |ctl, base, target| {
            let strategy = ctl.strategy_for(Task::Reindex { documents });
            tracing::info!(
                "Reindex: {} batches, {} documents -> generation {} (strategy={:?})",
                batches.len(),
                documents,
                target,
                strategy
            );
            let generation = GenerationBuilder::new(target, base.partitioning().clone())
                .with_strategy(strategy)
                .build(&batches)?;
            on_built();
            Ok(generation)
        })
    }

    /// 后台 repartition：按新方案过滤当前代际
    pub fn repartition(self: &Arc<Self>, partitioning: Partitioning) -> Result<MaintenanceTicket> {
        partitioning.validate()?;
        self.spawn(Operation::Repartition, move |ctl, base, target| {
            let postings = base.postings().total_postings();
            let strategy = ctl.strategy_for(Task::Repartition { postings });
            tracing::info!(
                "Repartition: generation {} ({} postings) -> generation {} as [{}] (strategy={:?})",
                base.id(),
                postings,
                target,
                partitioning,
                strategy
            );
            GenerationBuilder::new(target, partitioning)
                .with_strategy(strategy)
                .repartition(base)
        })
    }

    fn strategy_for(&self, task: Task) -> ExecutionStrategy {
        let mut sched = self.scheduler.lock();
        sched.adjust_parallelism();
        sched.select_strategy(&task)
    }

    fn begin(&self, operation: Operation) -> Result<u64> {
        let mut st = self.state.lock();
        if let MaintenanceState::Building {
            operation: running,
            ..
        } = &*st
        {
            tracing::warn!("Rejecting {}: {} already in progress", operation, running);
            return Err(IndexError::Busy(*running));
        }
        let target = self.next_generation.fetch_add(1, Ordering::AcqRel);
        self.abort_requested.store(false, Ordering::Release);
        *st = MaintenanceState::Building {
            operation,
            target_generation: target,
            started_at_ms: now_ms(),
        };
        Ok(target)
    }

    fn spawn<F>(self: &Arc<Self>, operation: Operation, job: F) -> Result<MaintenanceTicket>
    where
        F: FnOnce(&IndexControl, &IndexGeneration, u64) -> Result<IndexGeneration>
            + Send
            + 'static,
    {
        let target = self.begin(operation)?;
        let base = self.current();
        let ticket = MaintenanceTicket {
            operation,
            base_generation: base.id(),
            target_generation: target,
        };

        let ctl = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("index-{}", operation))
            .spawn(move || {
                let mut guard = BuildGuard {
                    ctl: &ctl,
                    operation,
                    armed: true,
                };
                let started = Instant::now();
                let result = job(&*ctl, &*base, target).and_then(|generation| {
                    // 提前退出，省掉无用的快照写入；最终裁决在 commit 里
                    if ctl.abort_requested.swap(false, Ordering::AcqRel) {
                        return Err(IndexError::Aborted);
                    }
                    ctl.stage(&generation)?;
                    Ok(generation)
                });
                // 基准代际只在构建期需要
                drop(base);
                guard.armed = false;
                match result {
                    Ok(generation) => ctl.commit(operation, generation, started.elapsed()),
                    Err(e) => {
                        ctl.discard_staged();
                        ctl.fail(operation, e.to_string());
                    }
                }
            });

        if let Err(e) = spawned {
            self.fail(operation, format!("failed to spawn maintenance thread: {}", e));
            return Err(IndexError::Io(e));
        }
        Ok(ticket)
    }

    /// 快照写到暂存位置并 fsync；target 不变
    fn stage(&self, generation: &IndexGeneration) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store
            .write_staged(&generation.to_snapshot())
            .map_err(|e| IndexError::Snapshot(format!("{:#}", e)))
    }

    fn commit_staged(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store
            .commit_staged()
            .map_err(|e| IndexError::Snapshot(format!("{:#}", e)))
    }

    fn discard_staged(&self) {
        if let Some(store) = &self.store {
            store.discard_staged();
        }
    }

    /// 提交点：持状态锁依次裁决 abort、提交快照、替换指针、复位状态。
    ///
    /// `request_abort` 持同一把锁，因此二者严格有序：
    /// abort 先到则快照与指针都不动；提交先到则 abort 看到 Ready 返回 false。
    /// 观察到 Ready 的调用方一定能看到新代际。
    fn commit(&self, operation: Operation, generation: IndexGeneration, took: Duration) {
        let generation = Arc::new(generation);
        let stats = generation.stats();
        let outcome = {
            let mut st = self.state.lock();
            let outcome = if self.abort_requested.swap(false, Ordering::AcqRel) {
                self.discard_staged();
                Err(IndexError::Aborted)
            } else if let Err(e) = self.commit_staged() {
                self.discard_staged();
                Err(e)
            } else {
                Ok(self.current.swap(generation))
            };
            *st = match &outcome {
                Ok(_) => MaintenanceState::Ready,
                Err(e) => MaintenanceState::Failed {
                    operation,
                    reason: e.to_string(),
                },
            };
            self.idle.notify_all();
            outcome
        };

        let old = match outcome {
            Ok(old) => old,
            Err(e) => {
                tracing::warn!(
                    "{} failed, current generation keeps serving: {}",
                    operation,
                    e
                );
                return;
            }
        };
        tracing::info!(
            "{} complete in {:?}: generation {} published (replaces {})",
            operation,
            took,
            stats.generation,
            old.id()
        );
        // 旧代际在最后一个查询释放后回收
        drop(old);
        maybe_trim_rss();
        tracing::info!("\n{}", stats);
    }

    fn fail(&self, operation: Operation, reason: String) {
        tracing::warn!(
            "{} failed, current generation keeps serving: {}",
            operation,
            reason
        );
        let mut st = self.state.lock();
        *st = MaintenanceState::Failed { operation, reason };
        self.idle.notify_all();
    }
}

/// 维护线程 panic 时兜底：状态置为 Failed，避免永久 Building
struct BuildGuard<'a> {
    ctl: &'a IndexControl,
    operation: Operation,
    armed: bool,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.ctl
                .fail(self.operation, "maintenance task panicked".to_string());
        }
    }
}
