use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use jjob_core::{JobDefinition, WorkerInfo};

/// 默认调度策略名称
pub const DEFAULT_STRATEGY_NAME: &str = "roundRobin";

/// Worker选择策略接口
///
/// 从候选Worker集合中为一次任务触发选出目标Worker，
/// 候选集为空时返回None而不报错。
pub trait SelectionStrategy: Send + Sync {
    fn select(&self, candidates: &[WorkerInfo], job: &JobDefinition) -> Option<String>;

    fn name(&self) -> &str;
}

/// 按ID排序的候选Worker ID列表，保证轮询类策略的遍历顺序稳定
fn sorted_candidate_ids(candidates: &[WorkerInfo]) -> Vec<&str> {
    let mut ids: Vec<&str> = candidates.iter().map(|w| w.id.as_str()).collect();
    ids.sort_unstable();
    ids
}

/// 轮询调度策略
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for RoundRobinStrategy {
    fn select(&self, candidates: &[WorkerInfo], job: &JobDefinition) -> Option<String> {
        if candidates.is_empty() {
            debug!("任务 {} 没有可用的Worker", job.name);
            return None;
        }

        let ids = sorted_candidate_ids(candidates);
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % ids.len();
        let selected = ids[index];

        debug!(
            "轮询策略为任务 {} 选择Worker: {} (索引: {}/{})",
            job.name,
            selected,
            index,
            ids.len()
        );

        Some(selected.to_string())
    }

    fn name(&self) -> &str {
        "roundRobin"
    }
}

/// 随机调度策略
pub struct RandomStrategy;

impl RandomStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for RandomStrategy {
    fn select(&self, candidates: &[WorkerInfo], job: &JobDefinition) -> Option<String> {
        if candidates.is_empty() {
            debug!("任务 {} 没有可用的Worker", job.name);
            return None;
        }

        let ids = sorted_candidate_ids(candidates);
        let index = rand::rng().random_range(0..ids.len());
        let selected = ids[index];

        debug!("随机策略为任务 {} 选择Worker: {}", job.name, selected);

        Some(selected.to_string())
    }

    fn name(&self) -> &str {
        "random"
    }
}

/// 权重轮询调度策略
///
/// 共享计数器对总权重取模得到位置，再沿权重前缀定位候选，
/// 任意连续 `total_weight` 次调用中权重比例被精确兑现。
pub struct WeightedStrategy {
    counter: AtomicUsize,
}

impl WeightedStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for WeightedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for WeightedStrategy {
    fn select(&self, candidates: &[WorkerInfo], job: &JobDefinition) -> Option<String> {
        if candidates.is_empty() {
            debug!("任务 {} 没有可用的Worker", job.name);
            return None;
        }

        let mut weighted: Vec<(&str, usize)> = candidates
            .iter()
            .map(|w| (w.id.as_str(), w.effective_weight() as usize))
            .collect();
        weighted.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let total_weight: usize = weighted.iter().map(|(_, weight)| weight).sum();
        if total_weight == 0 {
            // 权重下限为1，此分支理论上不可达，保留随机兜底
            debug!("所有候选Worker权重为0，降级为随机选择");
            let index = rand::rng().random_range(0..weighted.len());
            return Some(weighted[index].0.to_string());
        }

        let position = self.counter.fetch_add(1, Ordering::Relaxed) % total_weight;
        let mut cursor = 0;
        for (id, weight) in &weighted {
            cursor += weight;
            if position < cursor {
                debug!(
                    "权重策略为任务 {} 选择Worker: {} (权重: {})",
                    job.name, id, weight
                );
                return Some(id.to_string());
            }
        }

        // 前缀遍历必然命中，兜底返回第一个候选
        Some(weighted[0].0.to_string())
    }

    fn name(&self) -> &str {
        "weighted"
    }
}

/// 调度策略工厂
///
/// 按名称管理可用策略，未知名称回退到默认的轮询策略。
pub struct StrategyFactory {
    strategies: HashMap<String, Arc<dyn SelectionStrategy>>,
}

impl StrategyFactory {
    pub fn new() -> Self {
        let mut factory = Self {
            strategies: HashMap::new(),
        };
        factory.register(Arc::new(RoundRobinStrategy::new()));
        factory.register(Arc::new(RandomStrategy::new()));
        factory.register(Arc::new(WeightedStrategy::new()));
        factory
    }

    /// 注册调度策略
    pub fn register(&mut self, strategy: Arc<dyn SelectionStrategy>) {
        self.strategies
            .insert(strategy.name().to_string(), strategy);
    }

    /// 按名称获取策略，空白或未知名称返回默认策略
    pub fn get(&self, strategy_name: &str) -> Arc<dyn SelectionStrategy> {
        let name = strategy_name.trim();
        let name = if name.is_empty() {
            DEFAULT_STRATEGY_NAME
        } else {
            name
        };

        match self.strategies.get(name) {
            Some(strategy) => Arc::clone(strategy),
            None => {
                debug!("未知的调度策略 {}，使用默认策略", name);
                Arc::clone(
                    self.strategies
                        .get(DEFAULT_STRATEGY_NAME)
                        .expect("default strategy is registered in new()"),
                )
            }
        }
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }
}

impl Default for StrategyFactory {
    fn default() -> Self {
        Self::new()
    }
}
