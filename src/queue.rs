//! Deferred dispatch.
//!
//! Promise continuations never run inside the call that registers them or
//! the call that settles a promise. They are handed to a [`Schedule`]
//! implementation instead, which runs them on a later turn. The default is a
//! thread-local [`MicrotaskQueue`] that the host drains with
//! [`run_until_stalled`].

use log::trace;
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::Rc,
};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// The host's asynchronous callback deferral.
///
/// Implementations must run tasks in the order they were scheduled, never
/// synchronously inside `schedule`, and never reentrantly.
pub trait Schedule {
    fn schedule(&self, task: Task);

    /// Runs queued tasks until none are left and returns how many ran.
    ///
    /// Hosts whose own event loop runs the tasks keep the default, which does
    /// nothing.
    fn run_until_stalled(&self) -> usize {
        0
    }
}

/// FIFO task queue drained explicitly by its owner.
///
/// # Examples
///
/// ```
/// use promise_aplus::queue::{MicrotaskQueue, Schedule};
/// use std::{cell::Cell, rc::Rc};
///
/// let queue = MicrotaskQueue::new();
/// let ran = Rc::new(Cell::new(false));
/// let flag = ran.clone();
/// queue.schedule(Box::new(move || flag.set(true)));
/// assert!(!ran.get());
/// assert_eq!(queue.run_until_stalled(), 1);
/// assert!(ran.get());
/// ```
#[derive(Default)]
pub struct MicrotaskQueue {
    tasks: RefCell<VecDeque<Task>>,
    draining: Cell<bool>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

impl fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("len", &self.len())
            .field("draining", &self.draining.get())
            .finish()
    }
}

impl Schedule for MicrotaskQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }

    fn run_until_stalled(&self) -> usize {
        if self.draining.replace(true) {
            return 0;
        }
        // Clears the flag even if a task panics.
        let _guard = Draining(&self.draining);

        let mut ran = 0;
        loop {
            // The borrow ends before the task runs so it can schedule more.
            let next = self.tasks.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        trace!("drained {} microtasks", ran);
        ran
    }
}

struct Draining<'a>(&'a Cell<bool>);

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

thread_local! {
    static CURRENT: RefCell<Rc<dyn Schedule>> =
        RefCell::new(Rc::new(MicrotaskQueue::new()) as Rc<dyn Schedule>);
}

/// The scheduler new promises on this thread are created with.
pub fn current() -> Rc<dyn Schedule> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Replaces this thread's scheduler, returning the previous one.
///
/// Promises that already exist keep the scheduler they were created with.
pub fn set_current(scheduler: Rc<dyn Schedule>) -> Rc<dyn Schedule> {
    CURRENT.with(|current| std::mem::replace(&mut *current.borrow_mut(), scheduler))
}

/// Drains this thread's current scheduler.
pub fn run_until_stalled() -> usize {
    current().run_until_stalled()
}

#[cfg(test)]
mod tests {
    use super::{MicrotaskQueue, Schedule};
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn test_runs_in_fifo_order() {
        let queue = MicrotaskQueue::new();
        let log = Rc::new(RefCell::new(vec![]));
        for i in 0..3 {
            let log = log.clone();
            queue.schedule(Box::new(move || log.borrow_mut().push(i)));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.run_until_stalled(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_tasks_scheduled_while_draining_run_after_earlier_ones() {
        let queue = Rc::new(MicrotaskQueue::new());
        let log = Rc::new(RefCell::new(vec![]));

        let (q, l) = (queue.clone(), log.clone());
        queue.schedule(Box::new(move || {
            l.borrow_mut().push("first");
            let l = l.clone();
            q.schedule(Box::new(move || l.borrow_mut().push("nested")));
        }));
        let l = log.clone();
        queue.schedule(Box::new(move || l.borrow_mut().push("second")));

        assert_eq!(queue.run_until_stalled(), 3);
        assert_eq!(*log.borrow(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn test_drain_is_not_reentrant() {
        let queue = Rc::new(MicrotaskQueue::new());
        let nested = Rc::new(RefCell::new(None));

        let (q, n) = (queue.clone(), nested.clone());
        queue.schedule(Box::new(move || {
            *n.borrow_mut() = Some(q.run_until_stalled());
        }));
        assert_eq!(queue.run_until_stalled(), 1);
        assert_eq!(*nested.borrow(), Some(0));
    }

    #[test]
    fn test_set_current_swaps_the_thread_scheduler() {
        let mine: Rc<MicrotaskQueue> = Rc::new(MicrotaskQueue::new());
        let previous = super::set_current(mine.clone());
        super::current().schedule(Box::new(|| {}));
        assert_eq!(mine.len(), 1);
        assert_eq!(super::run_until_stalled(), 1);
        super::set_current(previous);
    }
}
