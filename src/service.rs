use crate::display::{ApplyExecutor, ApplyOutcome};
use crate::error::{ApplyError, ConfigurationConflict, EngineError};
use crate::hotkey_engine::{CaptureResult, EngineSignal, HotkeyEngine};
use crate::key_source::{KeyEvent, KeySource};
use crate::poller::{ConnectedDisplaysPoller, PollerHandle, TopologyChange};
use crate::profile::{CaptureOutcome, ProfileModel};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often the key pump wakes without input to expire idle captures.
const PUMP_TICK: Duration = Duration::from_millis(100);

/// Notifications for the UI and other collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    TopologyChanged {
        display_ids: Vec<String>,
        added: Vec<String>,
        removed: Vec<String>,
    },
    SlotActivated {
        display_id: String,
        slot_index: usize,
        result: Result<ApplyOutcome, ApplyError>,
    },
    ConfigurationConflict(ConfigurationConflict),
    HotkeyCaptured {
        display_id: String,
        slot_index: usize,
        keys: Vec<u32>,
    },
    HotkeyCaptureRejected {
        display_id: String,
        slot_index: usize,
        conflicting_display: String,
        conflicting_slot: usize,
    },
    HotkeyCaptureCancelled {
        display_id: String,
        slot_index: usize,
    },
}

pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: ServiceEvent);
}

/// Sink that only logs.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn dispatch(&self, event: ServiceEvent) {
        match &event {
            ServiceEvent::SlotActivated {
                result: Err(err), ..
            } => tracing::warn!(%err, "slot activation failed"),
            ServiceEvent::ConfigurationConflict(conflict) => {
                tracing::warn!(%conflict, "hotkey conflict")
            }
            other => tracing::info!(event = ?other, "service event"),
        }
    }
}

/// Work handed from the key pump and the poller to the worker thread.
#[derive(Debug)]
enum WorkItem {
    Activate {
        display_id: String,
        slot_index: usize,
    },
    CaptureFinished(CaptureResult),
    Topology(TopologyChange),
    Stop,
}

impl From<TopologyChange> for WorkItem {
    fn from(change: TopologyChange) -> Self {
        WorkItem::Topology(change)
    }
}

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

#[derive(Clone)]
struct Context {
    profile: Arc<ProfileModel>,
    executor: ApplyExecutor,
    sink: Arc<dyn EventSink>,
    poller: PollerHandle,
}

/// Wires key source, engine, profile, poller and apply executor together.
///
/// Two threads run while started: the key pump, which feeds the engine and
/// never touches the profile tree, and the worker, which performs applies,
/// capture commits and rebuilds one at a time in arrival order.
pub struct HotkeyService {
    ctx: Context,
    key_source: Box<dyn KeySource>,
    poller: ConnectedDisplaysPoller,
    pump: Option<WorkerHandle>,
    worker: Option<JoinHandle<()>>,
    work_tx: Option<Sender<WorkItem>>,
}

impl HotkeyService {
    pub fn new(
        profile: Arc<ProfileModel>,
        key_source: Box<dyn KeySource>,
        sink: Arc<dyn EventSink>,
        poll_interval: Duration,
    ) -> Self {
        let topology = profile.topology().clone();
        let poller = ConnectedDisplaysPoller::new(topology.clone(), poll_interval);
        poller.rebuild_complete(profile.display_count());
        let ctx = Context {
            executor: ApplyExecutor::new(topology),
            poller: poller.handle(),
            profile,
            sink,
        };
        Self {
            ctx,
            key_source,
            poller,
            pump: None,
            worker: None,
            work_tx: None,
        }
    }

    pub fn profile(&self) -> &Arc<ProfileModel> {
        &self.ctx.profile
    }

    fn engine(&self) -> &Arc<HotkeyEngine> {
        self.ctx.profile.engine()
    }

    pub fn is_running(&self) -> bool {
        self.pump.is_some()
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.pump.is_some() {
            return Ok(());
        }

        let (key_tx, key_rx) = mpsc::channel();
        self.key_source.install(key_tx)?;

        let (work_tx, work_rx) = mpsc::channel();
        let ctx = self.ctx.clone();
        self.worker = Some(thread::spawn(move || worker_loop(ctx, work_rx)));

        let (stop_tx, stop_rx) = mpsc::channel();
        let engine = Arc::clone(self.engine());
        let sink = Arc::clone(&self.ctx.sink);
        let pump_tx = work_tx.clone();
        let join = thread::spawn(move || pump_loop(engine, sink, key_rx, stop_rx, pump_tx));
        self.pump = Some(WorkerHandle { stop_tx, join });

        self.poller.start(work_tx.clone());
        self.work_tx = Some(work_tx);
        tracing::info!("hotkey service started");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.poller.stop();

        if let Err(err) = self.key_source.uninstall() {
            tracing::error!(?err, "failed to uninstall key source");
        }

        if let Some(pump) = self.pump.take() {
            let _ = pump.stop_tx.send(());
            let _ = pump.join.join();
        }

        if let Some(work_tx) = self.work_tx.take() {
            let _ = work_tx.send(WorkItem::Stop);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Suspend topology polling, e.g. while the settings window is open.
    pub fn suspend_polling(&self) {
        self.poller.suspend();
    }

    pub fn resume_polling(&self) {
        self.poller.resume();
    }

    /// Start recording a new combo for a slot. The result arrives as a
    /// `HotkeyCaptured`, `HotkeyCaptureRejected` or `HotkeyCaptureCancelled`
    /// event.
    pub fn begin_capture(&self, display: usize, slot: usize) -> Result<(), EngineError> {
        let view = self
            .ctx
            .profile
            .display(display)
            .ok_or(EngineError::UnknownDisplay(display))?;
        self.engine().begin_capture(display, &view.id, slot)
    }

    pub fn cancel_capture(&self) -> bool {
        self.engine().cancel_capture()
    }

    /// Feed a key event and handle the resulting work on this thread.
    pub fn process_key(&self, event: KeyEvent) {
        for signal in self.engine().handle_key(event) {
            if let Some(item) = route_signal(signal, &*self.ctx.sink) {
                handle_work(&self.ctx, item);
            }
        }
    }

    /// Expire an idle capture as the pump would at `now`.
    pub fn tick(&self, now: Instant) {
        if let Some(signal) = self.engine().expire_capture(now) {
            if let Some(item) = route_signal(signal, &*self.ctx.sink) {
                handle_work(&self.ctx, item);
            }
        }
    }

    /// Apply a slot on this thread, bypassing the hotkey path.
    pub fn apply_slot(&self, display_id: &str, slot_index: usize) -> Result<ApplyOutcome, ApplyError> {
        activate(&self.ctx, display_id, slot_index)
    }

    /// Rebuild now, as if the poller had signalled a change.
    pub fn refresh_topology(&self) {
        let current = self.ctx.profile.topology().count_connected();
        handle_work(
            &self.ctx,
            WorkItem::Topology(TopologyChange {
                previous: self.poller.last_known(),
                current,
            }),
        );
    }
}

impl Drop for HotkeyService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sink-only signals are dispatched here; the rest become work items.
fn route_signal(signal: EngineSignal, sink: &dyn EventSink) -> Option<WorkItem> {
    match signal {
        EngineSignal::Activate {
            display_id,
            slot_index,
            ..
        } => Some(WorkItem::Activate {
            display_id,
            slot_index,
        }),
        EngineSignal::Conflict(conflict) => {
            sink.dispatch(ServiceEvent::ConfigurationConflict(conflict));
            None
        }
        EngineSignal::CaptureFinished(result) => Some(WorkItem::CaptureFinished(result)),
    }
}

fn pump_loop(
    engine: Arc<HotkeyEngine>,
    sink: Arc<dyn EventSink>,
    key_rx: Receiver<KeyEvent>,
    stop_rx: Receiver<()>,
    work_tx: Sender<WorkItem>,
) {
    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }
        let signals = match key_rx.recv_timeout(PUMP_TICK) {
            Ok(event) => engine.handle_key(event),
            Err(RecvTimeoutError::Timeout) => engine.expire_capture(Instant::now()).into_iter().collect(),
            Err(RecvTimeoutError::Disconnected) => break,
        };
        for signal in signals {
            if let Some(item) = route_signal(signal, &*sink) {
                if work_tx.send(item).is_err() {
                    return;
                }
            }
        }
    }
}

fn worker_loop(ctx: Context, work_rx: Receiver<WorkItem>) {
    for item in work_rx {
        if matches!(item, WorkItem::Stop) {
            break;
        }
        handle_work(&ctx, item);
    }
}

fn activate(ctx: &Context, display_id: &str, slot_index: usize) -> Result<ApplyOutcome, ApplyError> {
    let result = ctx.profile.activate(&ctx.executor, display_id, slot_index);
    ctx.sink.dispatch(ServiceEvent::SlotActivated {
        display_id: display_id.to_string(),
        slot_index,
        result: result.clone(),
    });
    result
}

fn handle_work(ctx: &Context, item: WorkItem) {
    match item {
        WorkItem::Activate {
            display_id,
            slot_index,
        } => {
            let _ = activate(ctx, &display_id, slot_index);
        }
        WorkItem::CaptureFinished(result) => {
            let display_id = result.display_id.clone();
            let slot_index = result.slot_index;
            match ctx.profile.commit_capture(&result) {
                Ok(CaptureOutcome::Bound {
                    display_id,
                    slot_index,
                    keys,
                }) => ctx.sink.dispatch(ServiceEvent::HotkeyCaptured {
                    display_id,
                    slot_index,
                    keys,
                }),
                Ok(CaptureOutcome::Rejected {
                    display_id,
                    slot_index,
                    conflicting_display,
                    conflicting_slot,
                }) => ctx.sink.dispatch(ServiceEvent::HotkeyCaptureRejected {
                    display_id,
                    slot_index,
                    conflicting_display,
                    conflicting_slot,
                }),
                Ok(CaptureOutcome::Cancelled) => {
                    ctx.sink.dispatch(ServiceEvent::HotkeyCaptureCancelled {
                        display_id,
                        slot_index,
                    })
                }
                Err(err) => {
                    tracing::warn!(%err, display = %display_id, slot = slot_index, "could not bind captured hotkey");
                    ctx.sink.dispatch(ServiceEvent::HotkeyCaptureCancelled {
                        display_id,
                        slot_index,
                    });
                }
            }
        }
        WorkItem::Topology(change) => {
            tracing::debug!(previous = change.previous, current = change.current, "rebuilding profile");
            let diff = ctx.profile.rebuild();
            ctx.poller.rebuild_complete(diff.display_ids.len());
            ctx.sink.dispatch(ServiceEvent::TopologyChanged {
                display_ids: diff.display_ids,
                added: diff.added,
                removed: diff.removed,
            });
            for conflict in diff.conflicts {
                ctx.sink.dispatch(ServiceEvent::ConfigurationConflict(conflict));
            }
        }
        WorkItem::Stop => {}
    }
}
