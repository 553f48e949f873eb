use crate::display::TopologyAdapter;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// The number of connected displays differs from the last known count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyChange {
    pub previous: usize,
    pub current: usize,
}

#[derive(Debug)]
struct PollerState {
    last_known: usize,
    suspended: bool,
    stopped: bool,
    /// Set after a change is signalled; cleared by `rebuild_complete`.
    awaiting_rebuild: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<PollerState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rebuild_complete(&self, count: usize) {
        let mut state = self.lock();
        state.last_known = count;
        state.awaiting_rebuild = false;
    }
}

/// Background loop that notices displays being plugged in or removed.
///
/// A count of 0 is ignored since sleeping monitors report as disconnected.
/// After signalling a change the poller stays quiet until the consumer calls
/// [`rebuild_complete`](Self::rebuild_complete), so only one rebuild is ever
/// requested at a time.
pub struct ConnectedDisplaysPoller {
    shared: Arc<Shared>,
    topology: TopologyAdapter,
    interval: Duration,
    worker: Option<JoinHandle<()>>,
}

impl ConnectedDisplaysPoller {
    pub fn new(topology: TopologyAdapter, interval: Duration) -> Self {
        let last_known = topology.count_connected();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PollerState {
                    last_known,
                    suspended: false,
                    stopped: true,
                    awaiting_rebuild: false,
                }),
                wake: Condvar::new(),
            }),
            topology,
            interval: interval.max(Duration::from_millis(1)),
            worker: None,
        }
    }

    /// Spawn the polling thread. Changes are sent as `T::from(change)`.
    pub fn start<T>(&mut self, sender: Sender<T>)
    where
        T: From<TopologyChange> + Send + 'static,
    {
        if self.worker.is_some() {
            return;
        }
        self.shared.lock().stopped = false;

        let shared = Arc::clone(&self.shared);
        let topology = self.topology.clone();
        let interval = self.interval;
        self.worker = Some(thread::spawn(move || loop {
            {
                let guard = shared.lock();
                if guard.stopped {
                    break;
                }
                let (guard, _) = shared
                    .wake
                    .wait_timeout(guard, interval)
                    .unwrap_or_else(PoisonError::into_inner);
                if guard.stopped {
                    break;
                }
            }
            if let Some(change) = check(&shared, &topology) {
                if sender.send(T::from(change)).is_err() {
                    tracing::debug!("topology receiver dropped; poller exiting");
                    break;
                }
            }
        }));
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "display poller started");
    }

    pub fn stop(&mut self) {
        self.shared.lock().stopped = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Pause comparisons. The last known count is kept, so a change made
    /// while suspended is reported on the first check after `resume`.
    pub fn suspend(&self) {
        self.shared.lock().suspended = true;
    }

    pub fn resume(&self) {
        self.shared.lock().suspended = false;
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.lock().suspended
    }

    /// Accept `count` as the new baseline and re-arm change detection.
    pub fn rebuild_complete(&self, count: usize) {
        self.shared.rebuild_complete(count);
    }

    pub fn last_known(&self) -> usize {
        self.shared.lock().last_known
    }

    /// Run one comparison on the calling thread.
    pub fn poll_once(&self) -> Option<TopologyChange> {
        check(&self.shared, &self.topology)
    }

    /// Handle that can re-arm the poller from another thread.
    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for ConnectedDisplaysPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable control surface for a running poller.
#[derive(Clone)]
pub struct PollerHandle {
    shared: Arc<Shared>,
}

impl PollerHandle {
    pub fn rebuild_complete(&self, count: usize) {
        self.shared.rebuild_complete(count);
    }

    pub fn suspend(&self) {
        self.shared.lock().suspended = true;
    }

    pub fn resume(&self) {
        self.shared.lock().suspended = false;
    }
}

fn check(shared: &Shared, topology: &TopologyAdapter) -> Option<TopologyChange> {
    {
        let state = shared.lock();
        if state.suspended || state.awaiting_rebuild {
            return None;
        }
    }

    let current = topology.count_connected();
    if current == 0 {
        return None;
    }

    let mut state = shared.lock();
    if state.suspended || state.awaiting_rebuild || current == state.last_known {
        return None;
    }
    state.awaiting_rebuild = true;
    tracing::info!(previous = state.last_known, current, "connected display count changed");
    Some(TopologyChange {
        previous: state.last_known,
        current,
    })
}
