use crate::{
    error::Error,
    queue::{self, Schedule},
    resolution::{self, Resolution},
};
use log::{debug, trace};
use std::{
    cell::{Cell, RefCell},
    fmt,
    future::Future,
    mem,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

/// Where a promise is in its lifecycle. A promise leaves `Pending` at most
/// once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

/// A continuation passed to [`Promise::then`]. It receives the settled value
/// (or reason) and either returns what the derived promise resolves to or
/// fails with a reason.
pub type Handler<A, U, E> = Box<dyn FnOnce(A) -> Result<Resolution<U, E>, E>>;

// Receives the settled source promise once dispatched.
type Reaction<T, E> = Box<dyn FnOnce(&Promise<T, E>)>;

/// A single-threaded Promise/A+ deferred value.
///
/// A `Promise` starts pending and settles exactly once, either fulfilled
/// with a `T` or rejected with an `E`. Any number of continuations may be
/// attached with [`then`](Promise::then) and friends; they always run on a
/// later turn of the promise's [`Schedule`], never inside the call that
/// attached them.
///
/// Cloning a `Promise` clones the handle, not the value: every clone
/// observes the same settlement.
///
/// # Examples
///
/// ```
/// use promise_aplus::{queue, Promise, Resolution};
///
/// let answer = Promise::<i32, String>::new(|resolve, _reject| {
///     resolve.resolve(21);
///     Ok(())
/// })
/// .and_then(|n| Ok(Resolution::Value(n * 2)));
///
/// queue::run_until_stalled();
/// assert_eq!(answer.result(), Some(Ok(42)));
/// ```
pub struct Promise<T, E> {
    shared: Rc<Shared<T, E>>,
}

struct Shared<T, E> {
    core: RefCell<Core<T, E>>,
    scheduler: Rc<dyn Schedule>,
}

struct Core<T, E> {
    state: State,
    result: Option<Result<T, E>>,
    waiters: Vec<Reaction<T, E>>,
    wakers: Vec<Waker>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Promise {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .finish()
    }
}

impl<T, E> Promise<T, E> {
    fn pending(scheduler: Rc<dyn Schedule>) -> Self {
        Promise {
            shared: Rc::new(Shared {
                core: RefCell::new(Core {
                    state: State::Pending,
                    result: None,
                    waiters: Vec::new(),
                    wakers: Vec::new(),
                }),
                scheduler,
            }),
        }
    }

    pub fn state(&self) -> State {
        self.shared.core.borrow().state
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn scheduler(&self) -> Rc<dyn Schedule> {
        self.shared.scheduler.clone()
    }

    pub(crate) fn settlers(&self) -> (Resolver<T, E>, Rejecter<T, E>) {
        (
            Resolver {
                promise: self.clone(),
            },
            Rejecter {
                promise: self.clone(),
            },
        )
    }
}

impl<T: Clone, E: Clone> Promise<T, E> {
    /// The settled value or reason, or `None` while pending.
    pub fn result(&self) -> Option<Result<T, E>> {
        self.shared.core.borrow().result.clone()
    }
}

impl<T: 'static, E: 'static> Promise<T, E> {
    /// The one state transition. Later attempts are ignored.
    pub(crate) fn settle(&self, result: Result<T, E>) {
        let (waiters, wakers) = {
            let mut core = self.shared.core.borrow_mut();
            if core.state != State::Pending {
                trace!("promise already {:?}, ignoring settlement", core.state);
                return;
            }
            core.state = match result {
                Ok(_) => State::Fulfilled,
                Err(_) => State::Rejected,
            };
            core.result = Some(result);
            (mem::take(&mut core.waiters), mem::take(&mut core.wakers))
        };
        trace!(
            "promise {:?}, dispatching {} waiters",
            self.state(),
            waiters.len()
        );
        self.dispatch(waiters);
        for waker in wakers {
            waker.wake();
        }
    }

    fn register(&self, reaction: Reaction<T, E>) {
        {
            let mut core = self.shared.core.borrow_mut();
            if core.state == State::Pending {
                core.waiters.push(reaction);
                return;
            }
        }
        self.dispatch(vec![reaction]);
    }

    fn dispatch(&self, reactions: Vec<Reaction<T, E>>) {
        for reaction in reactions {
            let source = self.clone();
            self.shared
                .scheduler
                .schedule(Box::new(move || reaction(&source)));
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Creates a promise on this thread's current scheduler and runs
    /// `producer` synchronously with the two settlement handles.
    ///
    /// An `Err` returned by the producer rejects the promise (unless the
    /// producer already settled it). Construction itself never fails.
    pub fn new<P>(producer: P) -> Self
    where
        P: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        Self::new_in(queue::current(), producer)
    }

    /// Like [`new`](Promise::new), with an explicit scheduler. Promises
    /// derived from this one use the same scheduler, and so do combinators
    /// whose first input it is. Thenables adopted through
    /// [`resolve_with`](Promise::resolve_with) are tracked on the thread's
    /// current scheduler.
    pub fn new_in<P>(scheduler: Rc<dyn Schedule>, producer: P) -> Self
    where
        P: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        let promise = Promise::pending(scheduler);
        let (resolve, reject) = promise.settlers();
        if let Err(reason) = producer(resolve, reject) {
            debug!("promise producer failed, rejecting");
            promise.settle(Err(reason));
        }
        promise
    }

    /// An already fulfilled promise.
    pub fn resolve(value: T) -> Self {
        Self::new(|resolve, _| {
            resolve.resolve(value);
            Ok(())
        })
    }

    /// Adopts `candidate`: a promise is returned unchanged, a thenable is
    /// tracked until it settles, and a plain value is fulfilled.
    pub fn resolve_with(candidate: impl Into<Resolution<T, E>>) -> Self {
        match candidate.into() {
            Resolution::Promise(promise) => promise,
            Resolution::Value(value) => Self::resolve(value),
            thenable => {
                let promise = Promise::pending(queue::current());
                let (resolve, reject) = promise.settlers();
                resolution::resolve_promise(&promise, thenable, &resolve, &reject);
                promise
            }
        }
    }

    /// An already rejected promise.
    pub fn reject(reason: E) -> Self {
        Self::new(|_, reject| {
            reject.reject(reason);
            Ok(())
        })
    }

    /// A pending promise together with its settlement handles, for code that
    /// settles it from outside a producer.
    pub fn deferred() -> Deferred<T, E> {
        let promise = Promise::pending(queue::current());
        let (resolve, reject) = promise.settlers();
        Deferred {
            promise,
            resolve,
            reject,
        }
    }

    /// Attaches continuations and returns the promise they settle.
    ///
    /// A missing handler passes the settlement through unchanged: with no
    /// `on_fulfilled` the derived promise fulfills with the same value, with
    /// no `on_rejected` it rejects with the same reason.
    pub fn then(
        &self,
        on_fulfilled: Option<Handler<T, T, E>>,
        on_rejected: Option<Handler<E, T, E>>,
    ) -> Promise<T, E> {
        self.then_with(
            move |value| match on_fulfilled {
                Some(handler) => handler(value),
                None => Ok(Resolution::Value(value)),
            },
            move |reason| match on_rejected {
                Some(handler) => handler(reason),
                None => Err(reason),
            },
        )
    }

    /// Attaches both continuations. The derived promise may have a different
    /// value type.
    pub fn then_with<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        let derived = Promise::pending(self.scheduler());
        let reaction = Self::reaction(derived.clone(), on_fulfilled, on_rejected);
        let source = self.clone();
        // Registration waits for the next turn, so nothing attached here can
        // run before `then_with` returns, settled source or not.
        self.shared
            .scheduler
            .schedule(Box::new(move || source.register(reaction)));
        derived
    }

    /// Like [`then_with`](Promise::then_with), but joins the waiter list
    /// now. Handlers still run on a later turn, in the order the sources
    /// settled rather than the order they were subscribed to.
    pub(crate) fn subscribe<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        let derived = Promise::pending(self.scheduler());
        self.register(Self::reaction(derived.clone(), on_fulfilled, on_rejected));
        derived
    }

    fn reaction<U, F, R>(target: Promise<U, E>, on_fulfilled: F, on_rejected: R) -> Reaction<T, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        Box::new(move |settled: &Promise<T, E>| {
            settled.react(target, on_fulfilled, on_rejected)
        })
    }

    /// Attaches a fulfillment continuation; rejections pass through.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.then_with(on_fulfilled, |reason| Err(reason))
    }

    /// Attaches a rejection continuation; values pass through.
    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        self.then(None, Some(Box::new(on_rejected)))
    }

    /// Runs `callback` once this promise settles either way.
    ///
    /// The derived promise keeps this promise's value or reason, unless
    /// `callback` fails, in which case it rejects with that failure.
    pub fn finally<C>(&self, callback: C) -> Promise<T, E>
    where
        C: FnOnce() -> Result<(), E> + 'static,
    {
        let on_fulfilled = Rc::new(Cell::new(Some(callback)));
        let on_rejected = on_fulfilled.clone();
        self.then_with(
            move |value| {
                run_finally(&on_fulfilled)?;
                Ok(Resolution::Value(value))
            },
            move |reason| {
                run_finally(&on_rejected)?;
                Err(reason)
            },
        )
    }

    fn react<U, F, R>(&self, target: Promise<U, E>, on_fulfilled: F, on_rejected: R)
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E>,
        R: FnOnce(E) -> Result<Resolution<U, E>, E>,
    {
        // Dispatch on the state as it is now, not as it was at registration.
        let outcome = match self.result() {
            Some(Ok(value)) => on_fulfilled(value),
            Some(Err(reason)) => on_rejected(reason),
            None => return,
        };
        let (resolve, reject) = target.settlers();
        match outcome {
            Ok(candidate) => resolution::resolve_promise(&target, candidate, &resolve, &reject),
            Err(reason) => reject.reject(reason),
        }
    }
}

fn run_finally<C, E>(slot: &Cell<Option<C>>) -> Result<(), E>
where
    C: FnOnce() -> Result<(), E>,
{
    match slot.take() {
        Some(callback) => callback(),
        None => Ok(()),
    }
}

/// Awaiting a promise drains its scheduler, then waits for the settlement.
impl<T, E> Future for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.is_pending() {
            self.shared.scheduler.run_until_stalled();
        }
        let mut core = self.shared.core.borrow_mut();
        match core.result {
            Some(ref result) => Poll::Ready(result.clone()),
            None => {
                if !core.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    core.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// Fulfills the promise it was created for.
pub struct Resolver<T, E> {
    promise: Promise<T, E>,
}

impl<T: 'static, E: 'static> Resolver<T, E> {
    pub fn resolve(&self, value: T) {
        self.promise.settle(Ok(value))
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Resolver {
            promise: self.promise.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Resolver").field(&self.promise).finish()
    }
}

/// Rejects the promise it was created for.
pub struct Rejecter<T, E> {
    promise: Promise<T, E>,
}

impl<T: 'static, E: 'static> Rejecter<T, E> {
    pub fn reject(&self, reason: E) {
        self.promise.settle(Err(reason))
    }
}

impl<T, E> Clone for Rejecter<T, E> {
    fn clone(&self) -> Self {
        Rejecter {
            promise: self.promise.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Rejecter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rejecter").field(&self.promise).finish()
    }
}

/// A pending promise and its two settlement handles, each usable on its own.
///
/// # Examples
///
/// ```
/// use promise_aplus::Promise;
/// use futures::executor::block_on;
///
/// let deferred = Promise::<&str, String>::deferred();
/// let waiter = deferred.promise.clone();
/// deferred.resolve.resolve("🍓");
/// assert_eq!(block_on(waiter), Ok("🍓"));
/// ```
#[derive(Debug)]
pub struct Deferred<T, E> {
    pub promise: Promise<T, E>,
    pub resolve: Resolver<T, E>,
    pub reject: Rejecter<T, E>,
}
