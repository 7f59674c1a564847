use std::sync::atomic::{AtomicUsize, Ordering};
use sysinfo::System;

/// 小批量阈值：低于该规模的构建串行执行，避免线程池调度开销
const SERIAL_DOCUMENTS: usize = 10_000;
const SERIAL_POSTINGS: usize = 100_000;

/// 自适应调度器：按系统负载与内存压力决定维护任务的并行度
pub struct AdaptiveScheduler {
    target_parallelism: AtomicUsize,
    system: System,
}

impl Default for AdaptiveScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveScheduler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        Self {
            target_parallelism: AtomicUsize::new(num_cpus::get()),
            system: sys,
        }
    }

    /// 动态调整并行度
    pub fn adjust_parallelism(&mut self) -> usize {
        self.system.refresh_memory();

        let load = System::load_average().one;
        let cpu_count = num_cpus::get() as f64;
        let mem_free = self.system.available_memory();
        let total_mem = self.system.total_memory().max(1);
        let mem_pressure = 1.0 - (mem_free as f64 / total_mem as f64);

        // 维护任务与查询共享 CPU：空闲时用满核心，繁忙时让出一半给查询
        let new_parallelism = if load < cpu_count * 0.3 && mem_pressure < 0.5 {
            cpu_count as usize
        } else if load > cpu_count * 0.8 || mem_pressure > 0.8 {
            (cpu_count * 0.5) as usize
        } else {
            (cpu_count * 0.75) as usize
        }
        .max(1);

        let old = self
            .target_parallelism
            .swap(new_parallelism, Ordering::Relaxed);

        if old != new_parallelism {
            tracing::info!(
                "Adaptive parallelism: {} -> {} (load: {:.2}, mem_pressure: {:.2})",
                old,
                new_parallelism,
                load,
                mem_pressure
            );
        }

        new_parallelism
    }

    /// 根据任务规模选择执行策略
    pub fn select_strategy(&self, task: &Task) -> ExecutionStrategy {
        let threads = self.target_parallelism.load(Ordering::Relaxed).max(1);
        match task {
            Task::Reindex { documents } if *documents < SERIAL_DOCUMENTS => {
                ExecutionStrategy::Serial
            }
            Task::Repartition { postings } if *postings < SERIAL_POSTINGS => {
                ExecutionStrategy::Serial
            }
            _ if threads == 1 => ExecutionStrategy::Serial,
            _ => ExecutionStrategy::Parallel { threads },
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Task {
    Reindex { documents: usize },
    Repartition { postings: usize },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExecutionStrategy {
    Serial,
    Parallel { threads: usize },
}

impl ExecutionStrategy {
    pub fn is_parallel(self) -> bool {
        matches!(self, ExecutionStrategy::Parallel { .. })
    }

    /// 在限定线程数的 rayon 池中执行；建池失败时回退到全局池
    pub fn install<R, F>(self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match self {
            ExecutionStrategy::Serial => f(),
            ExecutionStrategy::Parallel { threads } => {
                match rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("index-build-{}", i))
                    .build()
                {
                    Ok(pool) => pool.install(f),
                    Err(e) => {
                        tracing::warn!("Build pool unavailable ({}), using global pool", e);
                        f()
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_tasks_run_serially() {
        let sched = AdaptiveScheduler::new();
        assert_eq!(
            sched.select_strategy(&Task::Reindex { documents: 10 }),
            ExecutionStrategy::Serial
        );
        assert_eq!(
            sched.select_strategy(&Task::Repartition { postings: 10 }),
            ExecutionStrategy::Serial
        );
    }

    #[test]
    fn adjusted_parallelism_is_positive() {
        let mut sched = AdaptiveScheduler::new();
        assert!(sched.adjust_parallelism() >= 1);
    }

    #[test]
    fn parallel_install_runs_closure() {
        let s = ExecutionStrategy::Parallel { threads: 2 };
        assert_eq!(s.install(|| rayon::current_num_threads()), 2);
        assert_eq!(ExecutionStrategy::Serial.install(|| 7), 7);
    }
}
