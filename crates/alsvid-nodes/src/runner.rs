//! The node runner.
//!
//! Owns everything between a node's pure steps: backend selection from the
//! network block, submission, the live progress loop, dataset assembly,
//! temporary-override revert, state-update recording and run persistence.

use std::path::PathBuf;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use alsvid_exec::{
    Backend, Job, JobStatus, POLL_INTERVAL, SimulatorBackend, backend_from_network, fetch_all,
};
use alsvid_fit::Dataset;
use alsvid_state::{Machine, StateUpdate, diff_state};

use crate::error::{NodeError, NodeResult};
use crate::node::{CalibrationNode, NodeAnalysis};
use crate::params::NodeParams;
use crate::store::RunStore;

/// Everything a finished run reports back.
#[derive(Debug)]
pub struct RunReport {
    pub job: Job,
    pub dataset: Dataset,
    pub analysis: NodeAnalysis,
    pub state_updates: Vec<StateUpdate>,
    pub run_id: Option<u32>,
    pub run_dir: Option<PathBuf>,
}

/// Orchestrates one node run end to end.
pub struct NodeRunner {
    backend_override: Option<Box<dyn Backend>>,
    store: Option<RunStore>,
    show_progress: bool,
}

impl Default for NodeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRunner {
    /// A runner selecting its backend from the machine's network block.
    pub fn new() -> Self {
        Self {
            backend_override: None,
            store: None,
            show_progress: true,
        }
    }

    /// Persist run records through this store.
    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Force a specific backend (tests, replays).
    pub fn with_backend(mut self, backend: Box<dyn Backend>) -> Self {
        self.backend_override = Some(backend);
        self
    }

    /// Suppress the live progress bar.
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Run one node against the machine.
    pub async fn run(
        &self,
        machine: &mut Machine,
        node: &dyn CalibrationNode,
        params: &NodeParams,
    ) -> NodeResult<RunReport> {
        if params.num_averages == 0 {
            return Err(NodeError::Parameter("num_averages must be positive".into()));
        }
        let targets = node.targets(machine, params)?;
        info!(node = node.name(), targets = ?targets, "starting run");

        // Temporary overrides live between here and the revert below.
        let pristine = machine.clone();
        node.prepare(machine, params)?;
        let config = machine.generate_config();
        let program = node.build(machine, params)?;
        program.validate()?;

        let backend: &dyn Backend;
        let owned: Box<dyn Backend>;
        if let Some(b) = &self.backend_override {
            backend = b.as_ref();
        } else if params.simulate {
            owned = Box::new(SimulatorBackend::new(params.simulation_duration_ns));
            backend = owned.as_ref();
        } else {
            owned = backend_from_network(
                &machine.network,
                Duration::from_secs(params.timeout_s),
            )?;
            backend = owned.as_ref();
        }

        let job_id = backend.submit(&program, &config).await?;
        debug!(job = %job_id, backend = backend.name(), "submitted");

        let handles = backend.handles(&job_id).await?;
        let bar = self.show_progress.then(|| {
            let bar = ProgressBar::new(params.num_averages as u64);
            bar.set_style(
                ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
                    .expect("static template"),
            );
            bar.set_message(node.name());
            bar
        });
        while handles.is_processing().await? {
            if let Some(n) = backend.progress(&job_id, "n").await? {
                if let Some(bar) = &bar {
                    bar.set_position(n);
                }
            }
            sleep(POLL_INTERVAL).await;
        }
        handles.wait_for_all_values().await?;
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }

        let results = fetch_all(handles.as_ref()).await?;
        backend.release(&job_id).await;
        let job = Job::new(job_id, program.name.clone())
            .with_backend(backend.name())
            .with_status(JobStatus::Completed);

        // Revert the temporary overrides before analysis sees the machine.
        *machine = pristine;

        let axes = node.axes(machine, params)?;
        let dataset = Dataset::assemble(&results, &targets, &axes)?;

        if params.simulate {
            // Simulation exercises the fetch/assembly path only; placeholder
            // data is not worth analyzing.
            let report = RunReport {
                job,
                dataset,
                analysis: NodeAnalysis::default(),
                state_updates: Vec::new(),
                run_id: None,
                run_dir: None,
            };
            return self.persist(node, params, machine, report);
        }

        let analysis = node.analyze(&dataset, machine, params)?;
        for (target, record) in &analysis.fit_results {
            if !record.outcome.is_successful() {
                warn!(node = node.name(), target, ?record.outcome, "fit failed");
            }
        }

        // Record exactly what apply() changes.
        let before = serde_json::to_value(&*machine)?;
        node.apply(machine, &analysis)?;
        let after = serde_json::to_value(&*machine)?;
        let state_updates = diff_state(&before, &after);

        let report = RunReport {
            job,
            dataset,
            analysis,
            state_updates,
            run_id: None,
            run_dir: None,
        };
        self.persist(node, params, machine, report)
    }

    fn persist(
        &self,
        node: &dyn CalibrationNode,
        params: &NodeParams,
        machine: &Machine,
        mut report: RunReport,
    ) -> NodeResult<RunReport> {
        let Some(store) = &self.store else {
            return Ok(report);
        };
        let run = store.create_run_dir(node.name())?;
        run.save_json("parameters.json", params)?;
        run.save_json("data.json", &report.dataset.to_json())?;
        run.save_json("analysis.json", &report.analysis)?;
        run.save_json("state_updates.json", &report.state_updates)?;
        machine.save(&run.path)?;
        info!(run = %run.path.display(), "run recorded");
        report.run_id = Some(run.id);
        report.run_dir = Some(run.path);
        Ok(report)
    }
}
