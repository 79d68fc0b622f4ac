//! Offline waveform simulator.
//!
//! Every node has a `simulate` escape hatch: instead of submitting to the
//! service, the program is rendered sample by sample onto its controller
//! channels for a requested duration. Measurement pipelines yield
//! deterministic placeholder arrays shaped exactly as the real backend
//! would shape them, so the fetch/assembly path runs unchanged offline.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::ArrayD;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use alsvid_seq::{Instr, Program, StreamKind, waveform};
use alsvid_state::ControllerConfig;

use crate::backend::{Backend, ResultHandle, ResultHandles};
use crate::error::{ExecError, ExecResult};
use crate::job::{JobId, JobStatus};

/// Rendered samples of one output channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSamples {
    pub i: Vec<f64>,
    pub q: Vec<f64>,
}

/// All rendered channels, keyed by `controller/port`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatedSamples {
    pub channels: BTreeMap<String, ChannelSamples>,
}

/// One simulated run: the rendered samples plus the synthesized results.
pub struct SimRun {
    pub samples: SimulatedSamples,
    results: BTreeMap<String, ArrayD<f64>>,
}

/// Backend rendering programs offline.
pub struct SimulatorBackend {
    duration_ns: u32,
    jobs: Mutex<BTreeMap<JobId, Arc<SimRun>>>,
}

impl SimulatorBackend {
    /// Simulate for the given duration.
    pub fn new(duration_ns: u32) -> Self {
        Self {
            duration_ns,
            jobs: Mutex::new(BTreeMap::new()),
        }
    }

    /// Rendered samples of a submitted job.
    pub async fn samples(&self, job: &JobId) -> ExecResult<SimulatedSamples> {
        let jobs = self.jobs.lock().await;
        let run = jobs
            .get(job)
            .ok_or_else(|| ExecError::HandleNotFound(job.to_string()))?;
        Ok(run.samples.clone())
    }
}

#[async_trait]
impl Backend for SimulatorBackend {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn submit(&self, program: &Program, config: &ControllerConfig) -> ExecResult<JobId> {
        program.validate()?;
        debug!(program = %program.name, duration_ns = self.duration_ns, "rendering");
        let samples = render(program, config, self.duration_ns);
        let results = synthesize_results(program, config);
        let job = JobId::new(Uuid::new_v4().to_string());
        self.jobs.lock().await.insert(
            job.clone(),
            Arc::new(SimRun { samples, results }),
        );
        Ok(job)
    }

    async fn status(&self, job: &JobId) -> ExecResult<JobStatus> {
        let jobs = self.jobs.lock().await;
        if jobs.contains_key(job) {
            Ok(JobStatus::Completed)
        } else {
            Err(ExecError::HandleNotFound(job.to_string()))
        }
    }

    async fn handles(&self, job: &JobId) -> ExecResult<Box<dyn ResultHandles>> {
        let jobs = self.jobs.lock().await;
        let run = jobs
            .get(job)
            .ok_or_else(|| ExecError::HandleNotFound(job.to_string()))?;
        Ok(Box::new(SimResultHandles {
            run: Arc::clone(run),
        }))
    }

    async fn cancel(&self, _job: &JobId) -> ExecResult<()> {
        Ok(())
    }

    async fn progress(&self, _job: &JobId, _counter: &str) -> ExecResult<Option<u64>> {
        Ok(None)
    }
}

struct SimResultHandles {
    run: Arc<SimRun>,
}

#[async_trait]
impl ResultHandles for SimResultHandles {
    fn keys(&self) -> Vec<String> {
        self.run.results.keys().cloned().collect()
    }

    fn get(&self, name: &str) -> ExecResult<Box<dyn ResultHandle>> {
        let array = self
            .run
            .results
            .get(name)
            .ok_or_else(|| ExecError::HandleNotFound(name.to_string()))?;
        Ok(Box::new(SimResultHandle {
            name: name.to_string(),
            array: array.clone(),
        }))
    }

    async fn is_processing(&self) -> ExecResult<bool> {
        Ok(false)
    }

    async fn wait_for_all_values(&self) -> ExecResult<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct SimResultHandle {
    name: String,
    array: ArrayD<f64>,
}

#[async_trait]
impl ResultHandle for SimResultHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> ExecResult<ArrayD<f64>> {
        Ok(self.array.clone())
    }

    async fn count_so_far(&self) -> ExecResult<Option<u64>> {
        Ok(None)
    }
}

// ─── Rendering ──────────────────────────────────────────────────────

struct RenderState<'a> {
    config: &'a ControllerConfig,
    duration: usize,
    channels: BTreeMap<String, ChannelSamples>,
    /// Per-element time cursor, ns.
    cursor: HashMap<String, usize>,
    /// Per-element frame angle, radians.
    frame: HashMap<String, f64>,
    /// DC offset steps per channel: (time, volts).
    dc_steps: BTreeMap<String, Vec<(usize, f64)>>,
}

impl RenderState<'_> {
    fn channel_key(&self, element: &str) -> Option<String> {
        self.config
            .element(element)
            .map(|e| format!("{}/{}", e.output.controller, e.output.port))
    }

    fn cursor(&self, element: &str) -> usize {
        self.cursor.get(element).copied().unwrap_or(0)
    }

    fn advance(&mut self, element: &str, by: usize) {
        let entry = self.cursor.entry(element.to_string()).or_insert(0);
        *entry += by;
    }

    fn write(&mut self, element: &str, i: &[f64], q: &[f64]) {
        let Some(key) = self.channel_key(element) else {
            return;
        };
        let start = self.cursor(element);
        let duration = self.duration;
        let buffer = self
            .channels
            .entry(key)
            .or_insert_with(|| ChannelSamples {
                i: vec![0.0; duration],
                q: vec![0.0; duration],
            });
        let frame = self.frame.get(element).copied().unwrap_or(0.0);
        let (c, s) = (frame.cos(), frame.sin());
        for (k, (&vi, &vq)) in i.iter().zip(q.iter()).enumerate() {
            let t = start + k;
            if t >= duration {
                break;
            }
            buffer.i[t] += vi * c - vq * s;
            buffer.q[t] += vi * s + vq * c;
        }
    }

    fn done(&self) -> bool {
        !self.cursor.is_empty() && self.cursor.values().all(|&c| c >= self.duration)
    }
}

/// Render a program onto its controller channels.
pub fn render(program: &Program, config: &ControllerConfig, duration_ns: u32) -> SimulatedSamples {
    let mut state = RenderState {
        config,
        duration: duration_ns as usize,
        channels: BTreeMap::new(),
        cursor: HashMap::new(),
        frame: HashMap::new(),
        dc_steps: BTreeMap::new(),
    };
    let bindings = HashMap::new();
    render_body(&program.body, &mut state, &bindings);

    // Fold the DC steps into the rendered I samples.
    for (key, mut steps) in std::mem::take(&mut state.dc_steps) {
        steps.sort_by_key(|(t, _)| *t);
        let duration = state.duration;
        let buffer = state
            .channels
            .entry(key)
            .or_insert_with(|| ChannelSamples {
                i: vec![0.0; duration],
                q: vec![0.0; duration],
            });
        let mut level = 0.0;
        let mut next = 0usize;
        for (t, sample) in buffer.i.iter_mut().enumerate() {
            while next < steps.len() && steps[next].0 <= t {
                level = steps[next].1;
                next += 1;
            }
            *sample += level;
        }
    }

    SimulatedSamples {
        channels: state.channels,
    }
}

fn render_body(body: &[Instr], state: &mut RenderState<'_>, bindings: &HashMap<String, f64>) {
    for instr in body {
        if state.done() {
            return;
        }
        match instr {
            Instr::Play {
                element,
                operation,
                amp_scale,
                duration_ns,
            } => {
                let Some(cfg) = state.config.element(element) else {
                    continue;
                };
                let Some(op) = cfg.operations.get(operation) else {
                    continue;
                };
                let duration = duration_ns
                    .as_ref()
                    .and_then(|p| p.eval(bindings))
                    .map(|v| v.max(0.0) as u32);
                let mut wf = waveform::sample(op, duration);
                if let Some(scale) = amp_scale {
                    if let Some(matrix) = scale.eval(bindings) {
                        wf = wf.scaled(&matrix);
                    }
                }
                let (i, q): (Vec<f64>, Vec<f64>) =
                    (wf.i.iter().copied().collect(), wf.q.iter().copied().collect());
                state.write(element, &i, &q);
                state.advance(element, i.len());
            }
            Instr::FrameRotation { element, angle } => {
                if let Some(delta) = angle.eval(bindings) {
                    *state.frame.entry(element.clone()).or_insert(0.0) += delta;
                }
            }
            Instr::ResetPhase { element } => {
                state.frame.insert(element.clone(), 0.0);
            }
            Instr::SetFrequency { .. } => {
                // Baseband rendering ignores oscillator retunes.
            }
            Instr::Measure {
                element,
                operation,
                stream: _,
            }
            | Instr::MeasureRaw {
                element,
                operation,
                stream: _,
            } => {
                let Some(cfg) = state.config.element(element) else {
                    continue;
                };
                let Some(op) = cfg.operations.get(operation) else {
                    continue;
                };
                let wf = waveform::sample(op, None);
                let (i, q): (Vec<f64>, Vec<f64>) =
                    (wf.i.iter().copied().collect(), wf.q.iter().copied().collect());
                state.write(element, &i, &q);
                let tof = cfg.time_of_flight_ns.unwrap_or(0) as usize;
                state.advance(element, i.len() + tof);
            }
            Instr::Wait {
                elements,
                duration_ns,
            } => {
                if let Some(duration) = duration_ns.eval(bindings) {
                    for element in elements {
                        state.advance(element, duration.max(0.0) as usize);
                    }
                }
            }
            Instr::Align { elements } => {
                let targets: Vec<String> = if elements.is_empty() {
                    state.cursor.keys().cloned().collect()
                } else {
                    elements.clone()
                };
                let max = targets
                    .iter()
                    .map(|e| state.cursor(e))
                    .max()
                    .unwrap_or(0);
                for element in targets {
                    state.cursor.insert(element, max);
                }
            }
            Instr::SetDcOffset { element, volts } => {
                if let (Some(key), Some(volts)) = (state.channel_key(element), volts.eval(bindings))
                {
                    let t = state.cursor(element);
                    state.dc_steps.entry(key).or_default().push((t, volts));
                }
            }
            Instr::ActiveReset { qubit } => {
                // Feedback latency collapses to one readout on the resonator.
                let resonator = format!("{qubit}.resonator");
                if let Some(cfg) = state.config.element(&resonator) {
                    let length = cfg
                        .operations
                        .get("readout")
                        .map(|op| op.length_ns() as usize)
                        .unwrap_or(0);
                    let tof = cfg.time_of_flight_ns.unwrap_or(0) as usize;
                    state.advance(&resonator, length + tof);
                    let xy = format!("{qubit}.xy");
                    let max = state.cursor(&resonator).max(state.cursor(&xy));
                    state.cursor.insert(xy, max);
                }
            }
            Instr::ThermalReset { qubit, duration_ns } => {
                state.advance(&format!("{qubit}.xy"), *duration_ns as usize);
            }
            Instr::Sweep { axis, body } => {
                for &value in &axis.values {
                    if state.done() {
                        return;
                    }
                    let mut nested = bindings.clone();
                    nested.insert(axis.name.clone(), value);
                    render_body(body, state, &nested);
                }
            }
        }
    }
}

// ─── Placeholder results ────────────────────────────────────────────

/// Deterministic placeholder arrays shaped by the stream pipelines.
fn synthesize_results(program: &Program, config: &ControllerConfig) -> BTreeMap<String, ArrayD<f64>> {
    let mut out = BTreeMap::new();
    for pipeline in &program.pipelines {
        let kind = program
            .streams
            .iter()
            .find(|s| s.name == pipeline.source)
            .map(|s| s.kind)
            .unwrap_or(StreamKind::Scalar);

        let mut shape = pipeline.shape();
        if kind == StreamKind::AdcTrace {
            // Raw traces carry one sample per nanosecond of the readout
            // window; use the longest readout of the config.
            let window = config
                .elements
                .values()
                .filter_map(|e| e.operations.get("readout"))
                .map(|op| op.length_ns() as usize)
                .max()
                .unwrap_or(1024);
            shape.push(window);
        }

        let array = if shape.is_empty() {
            // Scalar counters report the final averaging count.
            ArrayD::from_shape_vec(vec![1], vec![program.shots as f64]).unwrap()
        } else {
            let len: usize = shape.iter().product();
            let phase = pipeline
                .save_as
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            let values: Vec<f64> = (0..len)
                .map(|k| 0.5 + 0.4 * ((k as f64) * 0.1 + phase as f64).sin())
                .collect();
            ArrayD::from_shape_vec(shape, values).unwrap()
        };
        out.insert(pipeline.save_as.clone(), array);
    }
    out
}
