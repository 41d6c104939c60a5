//! Virtual-clock scheduler for native tests

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use futures::executor::LocalSpawner;
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;

use super::Scheduler;

#[derive(Default)]
struct TimerSlot {
    fired: bool,
    waker: Option<Waker>,
}

struct Timer {
    deadline: u64,
    slot: Rc<RefCell<TimerSlot>>,
}

/// Timers only fire when the test calls [`ManualScheduler::advance`].
#[derive(Clone)]
pub(crate) struct ManualScheduler {
    spawner: LocalSpawner,
    now_ms: Rc<Cell<u64>>,
    timers: Rc<RefCell<Vec<Timer>>>,
}

impl ManualScheduler {
    pub(crate) fn new(spawner: LocalSpawner) -> Self {
        Self {
            spawner,
            now_ms: Rc::new(Cell::new(0)),
            timers: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Move the virtual clock forward and wake every timer that is due
    pub(crate) fn advance(&self, by: Duration) {
        let now = self.now_ms.get() + by.as_millis() as u64;
        self.now_ms.set(now);

        let due: Vec<Timer> = {
            let mut timers = self.timers.borrow_mut();
            let (due, pending) = timers.drain(..).partition(|t| t.deadline <= now);
            *timers = pending;
            due
        };
        for timer in due {
            let mut slot = timer.slot.borrow_mut();
            slot.fired = true;
            if let Some(waker) = slot.waker.take() {
                waker.wake();
            }
        }
    }

    pub(crate) fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }
}

struct ManualSleep {
    slot: Rc<RefCell<TimerSlot>>,
}

impl Future for ManualSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut slot = self.slot.borrow_mut();
        if slot.fired {
            Poll::Ready(())
        } else {
            slot.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl Scheduler for ManualScheduler {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let slot = Rc::new(RefCell::new(TimerSlot::default()));
        if duration.is_zero() {
            slot.borrow_mut().fired = true;
            return Box::pin(ManualSleep { slot });
        }
        self.timers.borrow_mut().push(Timer {
            deadline: self.now_ms.get() + duration.as_millis() as u64,
            slot: slot.clone(),
        });
        Box::pin(ManualSleep { slot })
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        self.spawner
            .spawn_local(task)
            .expect("local pool is alive for the whole test");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::LocalPool;

    #[test]
    fn test_sleep_fires_at_deadline() {
        let mut pool = LocalPool::new();
        let scheduler = ManualScheduler::new(pool.spawner());
        let done = Rc::new(Cell::new(false));

        let sleep = scheduler.sleep(Duration::from_millis(100));
        let done_clone = done.clone();
        scheduler.spawn(Box::pin(async move {
            sleep.await;
            done_clone.set(true);
        }));

        pool.run_until_stalled();
        scheduler.advance(Duration::from_millis(99));
        pool.run_until_stalled();
        assert!(!done.get());

        scheduler.advance(Duration::from_millis(1));
        pool.run_until_stalled();
        assert!(done.get());
        assert_eq!(scheduler.pending_timers(), 0);
    }
}
