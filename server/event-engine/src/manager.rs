//! Event Manager: intake queue, background worker, store accessors and
//! lifecycle transitions.
//!
//! `create_event` is the producer side of an unbounded channel and may be
//! called from any task or thread. Exactly one worker task drains the queue
//! in FIFO order and runs the pipeline step for each event while holding the
//! pipeline lock, so correlation windows and duplicate links are only ever
//! touched by one event at a time. Readers get clones taken under a read lock.
//!
//! The intake channel and its counters form one generation. A clean stop
//! hands the receiver back for the next `start`; a worker that has to be
//! aborted takes its generation with it and a fresh one is opened.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RuleSet};
use crate::correlation::CorrelationDefinition;
use crate::error::EngineError;
use crate::incident::IncidentSink;
use crate::lifecycle;
use crate::normalize::normalize;
use crate::pipeline::{Pipeline, Shared};
use crate::rules::Rule;
use crate::stats::{ProcessingStatus, Statistics};
use crate::types::{Event, EventStatus, NewEvent};

/// An event that exhausted its processing retries.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
  pub event: Event,
  pub attempts: u32,
  pub error: String,
  pub failed_at: DateTime<Utc>,
}

struct Queued {
  event: Event,
  attempts: u32,
}

/// Depth and in-flight counters of one intake generation.
#[derive(Default)]
struct Counters {
  /// Events waiting in the channel.
  depth: AtomicUsize,
  /// Events enqueued whose processing has not finished yet.
  pending: AtomicUsize,
}

/// Producer side of the current intake generation.
struct Intake {
  tx: mpsc::UnboundedSender<Queued>,
  counters: Arc<Counters>,
}

impl Intake {
  fn open() -> (Self, mpsc::UnboundedReceiver<Queued>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let intake = Self {
      tx,
      counters: Arc::new(Counters::default()),
    };
    (intake, rx)
  }
}

/// State that outlives intake generations.
#[derive(Default)]
struct QueueState {
  running: AtomicBool,
  dead_letters: RwLock<VecDeque<DeadLetter>>,
}

struct Worker {
  handle: JoinHandle<mpsc::UnboundedReceiver<Queued>>,
  shutdown: watch::Sender<bool>,
}

pub struct EventManager {
  config: Config,
  shared: Arc<Shared>,
  queue: Arc<QueueState>,
  pipeline: Arc<Mutex<Pipeline>>,
  intake: Mutex<Intake>,
  queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Queued>>>,
  worker: Mutex<Option<Worker>>,
}

impl EventManager {
  pub fn new(config: Config, sink: Arc<dyn IncidentSink>) -> Self {
    let (intake, rx) = Intake::open();
    let pipeline = Pipeline::new(&config, sink);
    Self {
      config,
      shared: Arc::new(Shared::default()),
      queue: Arc::new(QueueState::default()),
      pipeline: Arc::new(Mutex::new(pipeline)),
      intake: Mutex::new(intake),
      queue_rx: Mutex::new(Some(rx)),
      worker: Mutex::new(None),
    }
  }

  pub fn with_defaults(sink: Arc<dyn IncidentSink>) -> Self {
    Self::new(Config::default(), sink)
  }

  /// Build a manager from a loaded rule set, installing its rules and
  /// correlation definitions.
  pub fn from_rule_set(set: RuleSet, sink: Arc<dyn IncidentSink>) -> Result<Self, EngineError> {
    let manager = Self::new(set.engine, sink);
    for rule in set.rules {
      manager.add_rule(rule);
    }
    for definition in set.correlations {
      manager.add_correlation(definition)?;
    }
    Ok(manager)
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  // -------------------------------------------------------------------------
  // Rule and correlation configuration
  // -------------------------------------------------------------------------

  pub fn add_rule(&self, rule: Rule) {
    debug!(rule = %rule.id, priority = rule.priority, "rule added");
    self.pipeline.lock().add_rule(rule);
  }

  pub fn remove_rule(&self, id: &str) -> bool {
    self.pipeline.lock().remove_rule(id)
  }

  pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> bool {
    self.pipeline.lock().set_rule_enabled(id, enabled)
  }

  /// Snapshot of the rules in evaluation order, with their trigger counters.
  pub fn rules(&self) -> Vec<Rule> {
    self.pipeline.lock().rules().to_vec()
  }

  pub fn add_correlation(&self, definition: CorrelationDefinition) -> Result<(), EngineError> {
    debug!(definition = %definition.name, "correlation added");
    self.pipeline.lock().add_correlation(definition)
  }

  pub fn correlations(&self) -> Vec<CorrelationDefinition> {
    self.pipeline.lock().correlations().to_vec()
  }

  // -------------------------------------------------------------------------
  // Intake
  // -------------------------------------------------------------------------

  /// Validate and enqueue an event. Returns the event as created, before any
  /// processing; never waits on the worker.
  pub fn create_event(&self, raw: NewEvent) -> Result<Event, EngineError> {
    let event = normalize(&raw, Utc::now())?;

    let intake = self.intake.lock();
    intake.counters.pending.fetch_add(1, Ordering::SeqCst);
    intake.counters.depth.fetch_add(1, Ordering::SeqCst);
    let sent = intake.tx.send(Queued {
      event: event.clone(),
      attempts: 0,
    });
    if sent.is_err() {
      intake.counters.depth.fetch_sub(1, Ordering::SeqCst);
      intake.counters.pending.fetch_sub(1, Ordering::SeqCst);
      return Err(EngineError::QueueClosed);
    }

    debug!(event_id = %event.id, event_type = ?event.event_type, "event enqueued");
    Ok(event)
  }

  // -------------------------------------------------------------------------
  // Worker lifecycle
  // -------------------------------------------------------------------------

  /// Spawn the worker on the current tokio runtime. Starting a running
  /// manager is a no-op.
  pub fn start(&self) -> Result<(), EngineError> {
    let mut worker = self.worker.lock();
    if worker.is_some() {
      warn!("event worker already running");
      return Ok(());
    }
    let runtime = Handle::try_current().map_err(|e| EngineError::config(format!("start requires a tokio runtime: {}", e)))?;
    let rx = self
      .queue_rx
      .lock()
      .take()
      .ok_or_else(|| EngineError::Inconsistent("ingestion queue receiver missing".into()))?;
    let (requeue, counters) = {
      let intake = self.intake.lock();
      (intake.tx.clone(), intake.counters.clone())
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ctx = WorkerContext {
      max_retries: self.config.max_retries,
      dead_letter_capacity: self.config.dead_letter_capacity,
      sweep_every: Duration::from_secs(self.config.sweep_interval_secs.max(1)),
      shared: self.shared.clone(),
      queue: self.queue.clone(),
      counters,
      pipeline: self.pipeline.clone(),
      requeue,
    };
    let handle = runtime.spawn(run_worker(ctx, rx, shutdown_rx));

    self.queue.running.store(true, Ordering::SeqCst);
    *worker = Some(Worker {
      handle,
      shutdown: shutdown_tx,
    });
    info!("event worker started");
    Ok(())
  }

  /// Stop the worker after its in-flight event, waiting at most
  /// `shutdown_timeout_secs`. Events still queued are dropped; events
  /// created after the worker exits wait for the next `start`.
  pub async fn stop(&self) {
    let Some(worker) = self.worker.lock().take() else {
      return;
    };

    let _ = worker.shutdown.send(true);
    let mut handle = worker.handle;
    let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
    match tokio::time::timeout(timeout, &mut handle).await {
      Ok(Ok(rx)) => {
        *self.queue_rx.lock() = Some(rx);
        info!("event worker stopped");
      }
      Ok(Err(e)) => {
        error!(error = %e, "event worker task failed");
        self.reopen_intake();
      }
      Err(_) => {
        warn!(timeout_secs = self.config.shutdown_timeout_secs, "event worker did not stop in time; aborting");
        handle.abort();
        self.reopen_intake();
      }
    }
    self.queue.running.store(false, Ordering::SeqCst);
  }

  /// Replace an intake generation whose receiver went down with its worker.
  fn reopen_intake(&self) {
    let (fresh, rx) = Intake::open();
    let old = std::mem::replace(&mut *self.intake.lock(), fresh);
    *self.queue_rx.lock() = Some(rx);

    let dropped = old.counters.depth.load(Ordering::SeqCst);
    if dropped > 0 {
      warn!(dropped, "queued events lost with the stopped worker");
    }
  }

  pub fn is_running(&self) -> bool {
    self.queue.running.load(Ordering::SeqCst)
  }

  /// Wait until every enqueued event has finished processing (stored or
  /// dead-lettered). Returns `false` on timeout.
  pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
    let idle = async {
      while self.counters().pending.load(Ordering::SeqCst) > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    };
    tokio::time::timeout(timeout, idle).await.is_ok()
  }

  fn counters(&self) -> Arc<Counters> {
    self.intake.lock().counters.clone()
  }

  // -------------------------------------------------------------------------
  // Read accessors
  // -------------------------------------------------------------------------

  pub fn get_event(&self, id: &str) -> Option<Event> {
    self.shared.store.read().get(id).cloned()
  }

  pub fn get_events_by_status(&self, status: EventStatus) -> Vec<Event> {
    self.shared.store.read().by_status(status)
  }

  pub fn get_events_by_correlation(&self, correlation_id: &str) -> Vec<Event> {
    self.shared.store.read().by_correlation(correlation_id)
  }

  pub fn get_statistics(&self) -> Statistics {
    let mut stats = self.shared.stats.read().clone();
    stats.queue_size = self.counters().depth.load(Ordering::SeqCst);
    stats.processing_status = if self.is_running() {
      ProcessingStatus::Running
    } else {
      ProcessingStatus::Stopped
    };
    stats
  }

  pub fn dead_letters(&self) -> Vec<DeadLetter> {
    self.queue.dead_letters.read().iter().cloned().collect()
  }

  // -------------------------------------------------------------------------
  // Lifecycle transitions
  // -------------------------------------------------------------------------

  pub fn acknowledge(&self, id: &str, actor: &str) -> bool {
    self.transition(id, "acknowledged", |e, now| lifecycle::acknowledge(e, actor, now))
  }

  pub fn start_work(&self, id: &str, actor: &str) -> bool {
    self.transition(id, "in_progress", |e, now| lifecycle::start_work(e, actor, now))
  }

  pub fn resolve(&self, id: &str, actor: &str, notes: Option<&str>) -> bool {
    self.transition(id, "resolved", |e, now| lifecycle::resolve(e, actor, notes, now))
  }

  pub fn close(&self, id: &str, actor: &str, notes: Option<&str>) -> bool {
    self.transition(id, "closed", |e, now| lifecycle::close(e, actor, notes, now))
  }

  fn transition(&self, id: &str, to: &str, apply: impl FnOnce(&mut Event, DateTime<Utc>) -> bool) -> bool {
    let mut store = self.shared.store.write();
    let Some(event) = store.get_mut(id) else {
      debug!(event_id = %id, to, "transition on unknown event");
      return false;
    };
    let from = event.status;
    let ok = apply(event, Utc::now());
    if ok {
      info!(event_id = %id, from = ?from, to, "event status changed");
    } else {
      debug!(event_id = %id, from = ?from, to, "transition rejected");
    }
    ok
  }
}

impl Drop for EventManager {
  fn drop(&mut self) {
    if let Some(worker) = self.worker.get_mut().take() {
      let _ = worker.shutdown.send(true);
    }
  }
}

// ---------------------------------------------------------------------------
// Worker task
// ---------------------------------------------------------------------------

struct WorkerContext {
  max_retries: u32,
  dead_letter_capacity: usize,
  sweep_every: Duration,
  shared: Arc<Shared>,
  queue: Arc<QueueState>,
  counters: Arc<Counters>,
  pipeline: Arc<Mutex<Pipeline>>,
  requeue: mpsc::UnboundedSender<Queued>,
}

/// Drain the queue until shutdown, then drop what is still queued and hand
/// the receiver back.
async fn run_worker(
  ctx: WorkerContext,
  mut rx: mpsc::UnboundedReceiver<Queued>,
  mut shutdown: watch::Receiver<bool>,
) -> mpsc::UnboundedReceiver<Queued> {
  let mut sweep = tokio::time::interval(ctx.sweep_every);
  sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      biased;
      _ = shutdown.changed() => break,
      item = rx.recv() => match item {
        Some(item) => {
          ctx.counters.depth.fetch_sub(1, Ordering::SeqCst);
          ctx.handle(item);
        }
        None => break,
      },
      _ = sweep.tick() => ctx.sweep(),
    }
  }

  let mut dropped = 0;
  while rx.try_recv().is_ok() {
    dropped += 1;
  }
  if dropped > 0 {
    ctx.counters.depth.fetch_sub(dropped, Ordering::SeqCst);
    ctx.counters.pending.fetch_sub(dropped, Ordering::SeqCst);
    warn!(dropped, "queued events dropped at shutdown");
  }
  rx
}

impl WorkerContext {
  fn handle(&self, item: Queued) {
    let Queued { event, attempts } = item;
    let snapshot = event.clone();

    let result = catch_unwind(AssertUnwindSafe(|| self.pipeline.lock().process(event, &self.shared)));
    let failure = match result {
      Ok(Ok(_)) => None,
      Ok(Err(e)) => Some(e),
      Err(panic) => Some(EngineError::Panicked(panic_message(panic.as_ref()))),
    };

    if let Some(err) = failure {
      self.fail(snapshot, attempts, err);
    }
    self.counters.pending.fetch_sub(1, Ordering::SeqCst);
  }

  fn sweep(&self) {
    let result = catch_unwind(AssertUnwindSafe(|| self.pipeline.lock().sweep(Utc::now(), &self.shared)));
    match result {
      Ok(0) => {}
      Ok(created) => info!(incidents = created, "expired window entries escalated"),
      Err(panic) => error!(error = %panic_message(panic.as_ref()), "sweep failed"),
    }
  }

  /// Reset the event to `new` and either re-enqueue it or dead-letter it.
  fn fail(&self, mut event: Event, attempts: u32, err: EngineError) {
    self.shared.stats.write().record_failure();
    event.status = EventStatus::New;
    error!(event_id = %event.id, attempt = attempts + 1, error = %err, "event processing failed");

    if attempts < self.max_retries {
      self.counters.pending.fetch_add(1, Ordering::SeqCst);
      self.counters.depth.fetch_add(1, Ordering::SeqCst);
      let retry = Queued {
        event,
        attempts: attempts + 1,
      };
      if self.requeue.send(retry).is_ok() {
        return;
      }
      self.counters.depth.fetch_sub(1, Ordering::SeqCst);
      self.counters.pending.fetch_sub(1, Ordering::SeqCst);
      warn!("retry queue closed; event dropped");
      return;
    }

    warn!(event_id = %event.id, attempts = attempts + 1, "event dead-lettered");
    let mut dead = self.queue.dead_letters.write();
    if dead.len() >= self.dead_letter_capacity {
      dead.pop_front();
    }
    dead.push_back(DeadLetter {
      event,
      attempts: attempts + 1,
      error: err.to_string(),
      failed_at: Utc::now(),
    });
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
