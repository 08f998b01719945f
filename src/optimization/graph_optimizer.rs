use std::time::{Duration, Instant};

use crate::config::OptimizationLevel;
use crate::error::Result;
use crate::graph::Graph;

/// Upper bound on rounds over the pass list
const MAX_ROUNDS: usize = 1024;

/// Result of running an optimization pass
#[derive(Debug, Clone)]
pub struct PassResult {
    /// Name of the pass
    pub name: String,
    /// Number of rewrites applied
    pub optimizations_applied: usize,
    /// Duration of the pass
    pub duration: Duration,
    /// Whether the pass made any changes
    pub changed: bool,
}

impl PassResult {
    pub fn new(name: &str, optimizations_applied: usize, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            optimizations_applied,
            duration,
            changed: optimizations_applied > 0,
        }
    }
}

/// Statistics from running optimization passes
#[derive(Debug, Clone, Default)]
pub struct OptimizationStats {
    /// Results from each pass run, in order
    pub pass_results: Vec<PassResult>,
    /// Total number of rewrites applied
    pub total_optimizations: usize,
    /// Total time spent optimizing
    pub total_duration: Duration,
    /// Number of rounds over the pass list
    pub rounds: usize,
}

impl OptimizationStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass result
    pub fn add_pass_result(&mut self, result: PassResult) {
        self.total_optimizations += result.optimizations_applied;
        self.total_duration += result.duration;
        self.pass_results.push(result);
    }

    /// Rewrites applied by the pass called `name` across all rounds
    pub fn applied_by(&self, name: &str) -> usize {
        self.pass_results
            .iter()
            .filter(|result| result.name == name)
            .map(|result| result.optimizations_applied)
            .sum()
    }
}

/// Trait for graph rewrite passes
pub trait OptimizationPass: Send + Sync {
    /// Name of the pass
    fn name(&self) -> &str;

    /// Apply the pass until it finds nothing more to rewrite
    fn run(&self, graph: &mut Graph) -> Result<PassResult>;
}

/// Runs rewrite passes over a graph until none of them changes it
pub struct GraphOptimizer {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl Default for GraphOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphOptimizer {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Register an optimization pass
    pub fn register_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    /// Register the passes of the standard level
    pub fn with_default_passes(mut self) -> Self {
        for pass in Self::create_default_passes(OptimizationLevel::Standard) {
            self.register_pass(pass);
        }
        self
    }

    /// Create the passes for the given optimization level
    pub fn create_default_passes(level: OptimizationLevel) -> Vec<Box<dyn OptimizationPass>> {
        use crate::optimization::passes::matmul_fusion::TransposeMatMulFusion;
        use crate::optimization::passes::transpose_elimination::InverseTransposeElimination;

        match level {
            OptimizationLevel::None => Vec::new(),
            OptimizationLevel::Basic => {
                vec![Box::new(InverseTransposeElimination::new()) as Box<dyn OptimizationPass>]
            }
            OptimizationLevel::Standard => vec![
                Box::new(InverseTransposeElimination::new()) as Box<dyn OptimizationPass>,
                Box::new(TransposeMatMulFusion::new()) as Box<dyn OptimizationPass>,
            ],
        }
    }

    /// Optimize the graph with the passes of `level`
    pub fn optimize(&self, graph: &mut Graph, level: OptimizationLevel) -> Result<OptimizationStats> {
        let passes = Self::create_default_passes(level);
        self.run_passes(graph, &passes)
    }

    /// Optimize the graph with the registered passes
    pub fn run(&self, graph: &mut Graph) -> Result<OptimizationStats> {
        self.run_passes(graph, &self.passes)
    }

    /// Run `passes` in order, repeating the whole list until a round changes nothing
    pub fn run_passes(
        &self,
        graph: &mut Graph,
        passes: &[Box<dyn OptimizationPass>],
    ) -> Result<OptimizationStats> {
        let start = Instant::now();
        let mut stats = OptimizationStats::new();

        for _ in 0..MAX_ROUNDS {
            stats.rounds += 1;
            let mut changed = false;
            for pass in passes {
                let result = pass.run(graph)?;
                if result.changed {
                    log::debug!(
                        "{} applied {} rewrites in {:?}",
                        result.name,
                        result.optimizations_applied,
                        result.duration
                    );
                    if graph.options().validate_rewrites {
                        graph.check_valid()?;
                    }
                    changed = true;
                }
                stats.add_pass_result(result);
            }
            if !changed {
                break;
            }
        }

        log::info!(
            "optimizer applied {} rewrites in {} rounds ({:?})",
            stats.total_optimizations,
            stats.rounds,
            start.elapsed()
        );
        Ok(stats)
    }
}
