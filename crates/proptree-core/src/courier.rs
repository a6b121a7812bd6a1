//! Delivery endpoints: queues, delivery modes, and the dispatch loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError, Weak};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::CourierConfig;
use crate::error::{Error, Result};
use crate::notify::Record;
use crate::tree::Tree;

/// The observer's lock manager: acquired before a callback runs and
/// released immediately after, never held across two dispatches.
///
/// Stands in for the "user-customizable lock manager" collaborator
/// contract (`fn(lock_ptr, acquire: bool)`); a closure-based `with_lock`
/// is the natural Rust shape for that same contract.
pub trait ObserverLock: Send + Sync {
    fn with_lock(&self, f: &mut dyn FnMut());
}

/// The default observer lock: a plain mutex held only for the duration of
/// one callback invocation.
#[derive(Debug, Default)]
pub struct DefaultObserverLock(Mutex<()>);

impl ObserverLock for DefaultObserverLock {
    fn with_lock(&self, f: &mut dyn FnMut()) {
        let _guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f();
    }
}

struct Queues {
    expedited: VecDeque<Record>,
    normal: VecDeque<Record>,
}

impl Queues {
    fn is_empty(&self) -> bool {
        self.expedited.is_empty() && self.normal.is_empty()
    }
}

enum Mode {
    Threaded,
    ExternalNotify(Box<dyn Fn() + Send + Sync>),
    Waitable,
    Passive,
}

struct CourierCore {
    queues: Mutex<Queues>,
    cv: Condvar,
    attached: AtomicUsize,
    running: AtomicBool,
    mode: Mode,
    tree: Weak<Tree>,
    #[allow(dead_code)]
    config: CourierConfig,
}

/// A dispatch endpoint: two FIFO queues and one of four delivery modes.
pub struct Courier {
    core: Arc<CourierCore>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Courier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Courier")
            .field("attached", &self.core.attached.load(Ordering::Relaxed))
            .finish()
    }
}

impl Courier {
    fn new(tree: &Arc<Tree>, mode: Mode, config: CourierConfig) -> Arc<Self> {
        let core = Arc::new(CourierCore {
            queues: Mutex::new(Queues {
                expedited: VecDeque::new(),
                normal: VecDeque::new(),
            }),
            cv: Condvar::new(),
            attached: AtomicUsize::new(0),
            running: AtomicBool::new(true),
            mode,
            tree: Arc::downgrade(tree),
            config,
        });
        Arc::new(Courier {
            core,
            worker: Mutex::new(None),
        })
    }

    /// Creates a threaded courier: a dedicated worker thread dispatches
    /// records outside the tree lock as soon as they arrive.
    pub fn create_threaded(tree: &Arc<Tree>, config: CourierConfig) -> Result<Arc<Self>> {
        let courier = Self::new(tree, Mode::Threaded, config);
        let worker_core = Arc::clone(&courier.core);
        let handle = std::thread::Builder::new()
            .name(
                worker_core
                    .config
                    .name
                    .unwrap_or("proptree-courier")
                    .to_string(),
            )
            .spawn(move || worker_loop(worker_core))
            .map_err(Error::CourierSpawnFailed)?;
        *courier.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(courier)
    }

    /// Creates a courier that calls a user-supplied `notify` function
    /// every time a record is enqueued, instead of owning a worker thread.
    pub fn create_external_notify(
        tree: &Arc<Tree>,
        notify: impl Fn() + Send + Sync + 'static,
        config: CourierConfig,
    ) -> Arc<Self> {
        Self::new(tree, Mode::ExternalNotify(Box::new(notify)), config)
    }

    /// Creates a courier with no worker thread; the consumer calls
    /// [`Courier::wait`]/[`Courier::wait_and_dispatch`]/[`Courier::poll`].
    pub fn create_waitable(tree: &Arc<Tree>, config: CourierConfig) -> Arc<Self> {
        Self::new(tree, Mode::Waitable, config)
    }

    /// Creates a courier with no wakeup primitive at all; the consumer
    /// must call [`Courier::poll`] on its own schedule.
    pub fn create_passive(tree: &Arc<Tree>, config: CourierConfig) -> Arc<Self> {
        Self::new(tree, Mode::Passive, config)
    }

    pub(crate) fn attach(&self) {
        self.core.attached.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn detach(&self) {
        self.core.attached.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn attached_count(&self) -> usize {
        self.core.attached.load(Ordering::Acquire)
    }

    /// Enqueues `record`, routing to the expedited queue when `expedite`
    /// is set. Called with the tree lock already held by the caller.
    pub(crate) fn enqueue(&self, record: Record, expedite: bool) {
        {
            let mut q = self.core.queues.lock().unwrap_or_else(PoisonError::into_inner);
            if expedite {
                q.expedited.push_back(record);
            } else {
                q.normal.push_back(record);
            }
        }
        match &self.core.mode {
            Mode::Threaded | Mode::Waitable => self.core.cv.notify_one(),
            Mode::ExternalNotify(notify) => notify(),
            Mode::Passive => {}
        }
    }

    /// Non-blocking: dispatches whatever is currently queued, if anything.
    /// Returns whether any record was dispatched.
    pub fn poll(&self) -> bool {
        drain_once(&self.core)
    }

    /// Returns whether either queue currently has a record, without
    /// consuming it.
    pub fn check(&self) -> bool {
        !self
            .core
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Blocks until a record is available or `timeout` elapses, without
    /// dispatching it. Returns whether a record became available.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut guard = self.core.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.is_empty() {
            return true;
        }
        match timeout {
            None => {
                guard = self.core.cv.wait(guard).unwrap_or_else(PoisonError::into_inner);
                !guard.is_empty()
            }
            Some(d) => {
                let (g, _timeout_result) = self
                    .core
                    .cv
                    .wait_timeout(guard, d)
                    .unwrap_or_else(PoisonError::into_inner);
                !g.is_empty()
            }
        }
    }

    /// Equivalent to `wait` followed by `poll`.
    pub fn wait_and_dispatch(&self, timeout: Option<Duration>) -> bool {
        if self.wait(timeout) {
            drain_once(&self.core)
        } else {
            false
        }
    }

    /// Stops a threaded courier's worker and joins it. A no-op on other
    /// modes, which never owned a worker thread.
    pub fn stop(&self) {
        self.core.running.store(false, Ordering::Release);
        self.core.cv.notify_all();
        if let Some(handle) = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = handle.join();
        }
    }

    /// Logs (and tolerates) a non-empty attached count, then stops the
    /// worker if one exists. Matches the source's "destroy requires
    /// refcount == 0, violation is logged but tolerated" policy.
    pub fn destroy(&self) {
        let attached = self.attached_count();
        if attached != 0 {
            proptree_log::log_error!(
                "courier destroyed with {attached} subscription(s) still attached"
            );
        }
        self.stop();
    }
}

impl Drop for Courier {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(core: Arc<CourierCore>) {
    let mut guard = core.queues.lock().unwrap_or_else(PoisonError::into_inner);
    while core.running.load(Ordering::Acquire) {
        if guard.is_empty() {
            guard = core.cv.wait(guard).unwrap_or_else(PoisonError::into_inner);
            continue;
        }
        let (q_exp, q_nor) = take_batch(&mut guard);
        drop(guard);
        dispatch_and_retire(&core, q_exp, q_nor);
        guard = core.queues.lock().unwrap_or_else(PoisonError::into_inner);
    }
    guard.expedited.clear();
    guard.normal.clear();
}

/// Drains all expedited records plus (per the source's exact bias) at most
/// one normal record. See the crate's design notes on the open question
/// about expedited/normal wakeup ordering.
fn take_batch(guard: &mut Queues) -> (VecDeque<Record>, VecDeque<Record>) {
    let q_exp = std::mem::take(&mut guard.expedited);
    let mut q_nor = VecDeque::new();
    if let Some(r) = guard.normal.pop_front() {
        q_nor.push_back(r);
    }
    (q_exp, q_nor)
}

fn drain_once(core: &Arc<CourierCore>) -> bool {
    let mut guard = core.queues.lock().unwrap_or_else(PoisonError::into_inner);
    if guard.is_empty() {
        return false;
    }
    let (q_exp, q_nor) = take_batch(&mut guard);
    drop(guard);
    dispatch_and_retire(core, q_exp, q_nor);
    true
}

fn dispatch_and_retire(core: &Arc<CourierCore>, q_exp: VecDeque<Record>, q_nor: VecDeque<Record>) {
    let Some(tree) = core.tree.upgrade() else {
        return;
    };
    let mut completed = Vec::with_capacity(q_exp.len() + q_nor.len());
    dispatch_batch(&tree, q_exp, &mut completed);
    dispatch_batch(&tree, q_nor, &mut completed);
    tree.retire_records(completed);
}

fn dispatch_batch(tree: &Arc<Tree>, batch: VecDeque<Record>, completed: &mut Vec<Record>) {
    for record in batch {
        if let Some((trampoline, lock, ignore_void)) = tree.subscription_dispatch_info(record.sub) {
            let event = record.event;
            let payload = &record.payload;
            lock.with_lock(&mut || trampoline.invoke(event, payload, ignore_void));
        }
        completed.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Tree;

    #[test]
    fn passive_courier_reports_no_work_until_enqueued() {
        let tree = Tree::new(Default::default());
        let courier = Courier::create_passive(&tree, CourierConfig::default());
        assert!(!courier.check());
        assert!(!courier.poll());
    }

    #[test]
    fn destroy_on_attached_courier_does_not_panic() {
        let tree = Tree::new(Default::default());
        let courier = Courier::create_passive(&tree, CourierConfig::default());
        courier.attach();
        courier.destroy();
    }
}
