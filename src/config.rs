use serde::Serialize;
use strum::{Display, EnumString};

/// Which rewrite passes the optimizer runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum OptimizationLevel {
    /// No rewrites
    None,
    /// Inverse-transpose elimination only
    Basic,
    /// Inverse-transpose elimination and transpose folding into MatMul (default)
    Standard,
}

impl Default for OptimizationLevel {
    fn default() -> Self {
        OptimizationLevel::Standard
    }
}

/// How tensors are placed in the arena during memory planning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
pub enum MemoryStrategy {
    /// Every live tensor gets its own range for the whole run
    Sequential,
    /// Intermediate ranges are released after their last consumer and reused
    LifetimeReuse,
}

impl Default for MemoryStrategy {
    fn default() -> Self {
        MemoryStrategy::Sequential
    }
}

/// Options for the planning pipeline
#[derive(Debug, Clone)]
pub struct PlannerOptions {
    /// Level of optimization to apply
    pub optimization_level: OptimizationLevel,
    /// Placement strategy used by memory planning
    pub memory_strategy: MemoryStrategy,
    /// Run the structural validity check after every pass that changed the graph
    pub validate_rewrites: bool,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            optimization_level: OptimizationLevel::Standard,
            memory_strategy: MemoryStrategy::Sequential,
            validate_rewrites: true,
        }
    }
}

impl PlannerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the optimization level
    pub fn set_optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    /// Set the memory placement strategy
    pub fn set_memory_strategy(mut self, strategy: MemoryStrategy) -> Self {
        self.memory_strategy = strategy;
        self
    }

    /// Enable or disable validation after rewrites
    pub fn validate_rewrites(mut self, enable: bool) -> Self {
        self.validate_rewrites = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_defaults() {
        let options = PlannerOptions::new();
        assert_eq!(options.optimization_level, OptimizationLevel::Standard);
        assert_eq!(options.memory_strategy, MemoryStrategy::Sequential);
        assert!(options.validate_rewrites);
    }

    #[test]
    fn test_builder_setters() {
        let options = PlannerOptions::new()
            .set_optimization_level(OptimizationLevel::Basic)
            .set_memory_strategy(MemoryStrategy::LifetimeReuse)
            .validate_rewrites(false);
        assert_eq!(options.optimization_level, OptimizationLevel::Basic);
        assert_eq!(options.memory_strategy, MemoryStrategy::LifetimeReuse);
        assert!(!options.validate_rewrites);
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(MemoryStrategy::LifetimeReuse.to_string(), "LifetimeReuse");
        assert_eq!(OptimizationLevel::from_str("None").unwrap(), OptimizationLevel::None);
    }
}
