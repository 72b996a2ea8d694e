//! The delayed-task executor behind the straggler monitor.
//!
//! One timer serves one job. Each phase has a single slot: scheduling a pass
//! replaces (and thereby cancels) whatever was sleeping in that slot, and a
//! run gate keeps passes of different phases from executing concurrently.
//! The epoch guards rescheduling: a pass carries the epoch it was scheduled
//! under, and `drain` bumps it, so a drained chain cannot re-arm itself.

use std::future::Future;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Slot {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct TimerInner {
    epoch: u64,
    slots: [Option<Slot>; 2],
}

#[derive(Debug)]
pub(crate) struct MonitorTimer {
    run_gate: Arc<AsyncMutex<()>>,
    inner: Mutex<TimerInner>,
}

impl MonitorTimer {
    pub fn new() -> Self {
        MonitorTimer {
            run_gate: Arc::new(AsyncMutex::new(())),
            inner: Mutex::new(TimerInner::default()),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().unwrap().epoch
    }

    /// Arms the slot of one phase chain to run `pass` after `delay`.
    /// Refused when `epoch` is stale. Returns whether the pass was armed.
    pub fn schedule<F, Fut>(&self, epoch: u64, map_now: bool, delay: Duration, pass: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        if inner.epoch != epoch {
            return false;
        }
        let (cancel, canceled) = oneshot::channel();
        let gate = self.run_gate.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = canceled => return,
            }
            let _running = gate.lock().await;
            pass().await;
        });
        // Dropping a previous slot cancels the sleep it was waiting in.
        inner.slots[map_now as usize] = Some(Slot { cancel, handle });
        true
    }

    /// Cancels both chains and waits out any in-flight pass; nothing armed
    /// under the old epoch can fire afterwards. Returns the new epoch.
    pub async fn drain(&self) -> u64 {
        let (epoch, slots) = {
            let mut inner = self.inner.lock().unwrap();
            inner.epoch += 1;
            (inner.epoch, [inner.slots[0].take(), inner.slots[1].take()])
        };
        for slot in slots {
            if let Some(slot) = slot {
                let _ = slot.cancel.send(());
                let _ = slot.handle.await;
            }
        }
        epoch
    }
}
