//! Benchmark surface: whole-model timing and per-node breakdowns.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::tensor::{IValue, InferenceGuard};

use super::error::RuntimeError;
use super::runtime::StaticRuntime;

/// Per-node timing breakdown produced by
/// [`StaticRuntime::benchmark_individual_ops`].
#[derive(Debug, Default, Serialize)]
pub struct IndividualMetrics {
    /// Milliseconds spent binding inputs before the first timed run.
    pub setup_time: f64,
    /// Sum of per-node times, in milliseconds per iteration.
    pub total_time: f64,
    /// Milliseconds per iteration for each processed node, in execution
    /// order.
    pub time_per_node: Vec<f64>,
    /// Aggregate milliseconds per node kind.
    pub time_per_node_type: HashMap<String, f64>,
    /// Share of `total_time` per node kind, in percent.
    pub percent_per_node_type: HashMap<String, f64>,
    /// Number of nodes of each kind.
    pub instances_per_node_type: HashMap<String, usize>,
}

fn millis_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1e3
}

impl StaticRuntime {
    /// Times whole invocations: `warmup` untimed runs, then the mean wall
    /// time of `main` timed runs, in milliseconds per iteration.
    pub fn benchmark_model(
        &mut self,
        args: &[IValue],
        kwargs: &HashMap<String, IValue>,
        warmup_runs: usize,
        main_runs: usize,
    ) -> Result<f64, RuntimeError> {
        assert!(main_runs >= 1, "benchmark needs at least one main run");
        for _ in 0..warmup_runs {
            self.run(args.to_vec(), kwargs)?;
        }
        let start = Instant::now();
        for _ in 0..main_runs {
            self.run(args.to_vec(), kwargs)?;
        }
        Ok(millis_since(start) / main_runs as f64)
    }

    /// Times every processed node individually across `main_runs`
    /// invocations of the full sequence.
    pub fn benchmark_individual_ops(
        &mut self,
        args: &[IValue],
        kwargs: &HashMap<String, IValue>,
        warmup_runs: usize,
        main_runs: usize,
    ) -> Result<IndividualMetrics, RuntimeError> {
        assert!(main_runs >= 1, "benchmark needs at least one main run");
        let _no_autograd = InferenceGuard::new();

        let mut results = IndividualMetrics {
            time_per_node: vec![0.0; self.processed_nodes().len()],
            ..IndividualMetrics::default()
        };

        let setup_start = Instant::now();
        self.bind_inputs(args.to_vec(), kwargs)?;
        results.setup_time = millis_since(setup_start);

        for _ in 0..warmup_runs {
            self.run(args.to_vec(), kwargs)?;
        }

        for _ in 0..main_runs {
            self.allocate_if_planned();
            self.bind_inputs(args.to_vec(), kwargs)?;
            for index in 0..self.processed_nodes().len() {
                let start = Instant::now();
                self.run_node(index)?;
                results.time_per_node[index] += millis_since(start);
            }
            self.cleanup();
        }

        for (index, pnode) in self.processed_nodes().iter().enumerate() {
            let kind = pnode.kind().to_string();
            results.time_per_node[index] /= main_runs as f64;
            *results.time_per_node_type.entry(kind.clone()).or_default() +=
                results.time_per_node[index];
            *results.instances_per_node_type.entry(kind).or_default() += 1;
            results.total_time += results.time_per_node[index];
        }
        for (kind, time) in &results.time_per_node_type {
            results
                .percent_per_node_type
                .insert(kind.clone(), time / results.total_time * 100.0);
        }
        Ok(results)
    }

    /// Runs both benchmark modes and logs a formatted report.
    pub fn benchmark(
        &mut self,
        args: &[IValue],
        kwargs: &HashMap<String, IValue>,
        warmup_runs: usize,
        main_runs: usize,
    ) -> Result<(), RuntimeError> {
        let per_iter = self.benchmark_model(args, kwargs, warmup_runs, main_runs)?;
        info!(
            ms_per_iter = per_iter,
            iters_per_second = 1e3 / per_iter,
            "static runtime throughput"
        );

        let results = self.benchmark_individual_ops(args, kwargs, warmup_runs, main_runs)?;
        info!(setup_ms = results.setup_time, "setup");

        let mut by_type: Vec<(&String, &f64)> = results.time_per_node_type.iter().collect();
        by_type.sort_by(|a, b| b.1.total_cmp(a.1));
        for (kind, ms) in by_type {
            info!(
                kind = kind.as_str(),
                ms,
                percent = results.percent_per_node_type[kind],
                instances = results.instances_per_node_type[kind],
                "time per node type"
            );
        }
        info!(total_ms = results.total_time, "total");
        info!(
            managed_bytes = self.total_managed(),
            "total memory managed"
        );
        if let Ok(report) = serde_json::to_string(&results) {
            debug!(%report, "per-op metrics");
        }
        Ok(())
    }
}
