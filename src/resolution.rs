//! The promise resolution procedure.
//!
//! Whatever a handler hands back is a [`Resolution`]: a plain value, another
//! [`Promise`], or a foreign [`Thenable`]. The resolution procedure decides
//! how that candidate settles the derived promise, following nested promises and
//! thenables to their final value.

use crate::{
    error::Error,
    promise::{Promise, Rejecter, Resolver},
};
use log::{debug, trace, warn};
use std::{cell::Cell, fmt, rc::Rc};

/// A candidate settlement for a promise.
pub enum Resolution<T, E> {
    /// Fulfill with this value.
    Value(T),
    /// Follow this promise.
    Promise(Promise<T, E>),
    /// Follow this foreign thenable.
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable<H>(thenable: H) -> Self
    where
        H: Thenable<T, E> + 'static,
    {
        Resolution::Thenable(Box::new(thenable))
    }

    /// A thenable whose `then` is the given function.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{Promise, Resolution};
    /// use futures::executor::block_on;
    ///
    /// let thenable = Resolution::<i32, String>::from_fn(|resolve, _reject| {
    ///     resolve.fulfill(5);
    ///     Ok(())
    /// });
    /// let promise = Promise::<i32, String>::resolve_with(thenable);
    /// assert_eq!(block_on(promise), Ok(5));
    /// ```
    pub fn from_fn<F>(then: F) -> Self
    where
        F: Fn(ResolveOnce<T, E>, RejectOnce<T, E>) -> Result<(), E> + 'static,
    {
        Resolution::Thenable(Box::new(FnThenable(then)))
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// A foreign object exposing a callable `then`.
///
/// `then` subscribes the two callbacks to the object's eventual outcome.
/// Only the first call to either callback counts. Returning `Err` stands for
/// `then` failing (or the member being unreadable): the target promise is
/// rejected with it, unless a callback was already called.
pub trait Thenable<T, E> {
    fn then(&self, resolve: ResolveOnce<T, E>, reject: RejectOnce<T, E>) -> Result<(), E>;
}

struct FnThenable<F>(F);

impl<T, E, F> Thenable<T, E> for FnThenable<F>
where
    F: Fn(ResolveOnce<T, E>, RejectOnce<T, E>) -> Result<(), E>,
{
    fn then(&self, resolve: ResolveOnce<T, E>, reject: RejectOnce<T, E>) -> Result<(), E> {
        (self.0)(resolve, reject)
    }
}

/// The success callback handed to a [`Thenable`]. Shares its once-guard with
/// the matching [`RejectOnce`].
pub struct ResolveOnce<T, E> {
    target: Promise<T, E>,
    resolve: Resolver<T, E>,
    reject: Rejecter<T, E>,
    called: Rc<Cell<bool>>,
}

impl<T, E> ResolveOnce<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Resolves the target with `candidate`, which may itself be a promise or
    /// thenable.
    pub fn resolve(&self, candidate: impl Into<Resolution<T, E>>) {
        if self.called.replace(true) {
            trace!("thenable already settled its target, ignoring resolve");
            return;
        }
        resolve_promise(&self.target, candidate.into(), &self.resolve, &self.reject);
    }

    pub fn fulfill(&self, value: T) {
        self.resolve(Resolution::Value(value))
    }
}

impl<T, E> Clone for ResolveOnce<T, E> {
    fn clone(&self) -> Self {
        ResolveOnce {
            target: self.target.clone(),
            resolve: self.resolve.clone(),
            reject: self.reject.clone(),
            called: self.called.clone(),
        }
    }
}

/// The failure callback handed to a [`Thenable`].
pub struct RejectOnce<T, E> {
    reject: Rejecter<T, E>,
    called: Rc<Cell<bool>>,
}

impl<T: 'static, E: 'static> RejectOnce<T, E> {
    pub fn reject(&self, reason: E) {
        if self.called.replace(true) {
            trace!("thenable already settled its target, ignoring reject");
            return;
        }
        self.reject.reject(reason);
    }
}

impl<T, E> Clone for RejectOnce<T, E> {
    fn clone(&self) -> Self {
        RejectOnce {
            reject: self.reject.clone(),
            called: self.called.clone(),
        }
    }
}

/// Settles `target` according to `candidate`, using the target's own
/// settlement handles.
///
/// A candidate that is `target` itself rejects it with
/// [`Error::ChainingCycle`]. Another promise is followed until it settles.
/// A thenable's `then` is invoked with once-guarded callbacks. Anything else
/// fulfills `target`.
pub(crate) fn resolve_promise<T, E>(
    target: &Promise<T, E>,
    candidate: Resolution<T, E>,
    resolve: &Resolver<T, E>,
    reject: &Rejecter<T, E>,
) where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    match candidate {
        Resolution::Promise(promise) if promise.ptr_eq(target) => {
            warn!("promise resolved with itself, rejecting");
            reject.reject(E::from(Error::ChainingCycle));
        }
        Resolution::Promise(promise) => {
            let (target, resolve, reject) = (target.clone(), resolve.clone(), reject.clone());
            let on_rejected = reject.clone();
            promise.then_with(
                move |value| {
                    resolve_promise(&target, Resolution::Value(value), &resolve, &reject);
                    Ok(Resolution::Value(()))
                },
                move |reason| {
                    on_rejected.reject(reason);
                    Ok(Resolution::Value(()))
                },
            );
        }
        Resolution::Thenable(thenable) => {
            let called = Rc::new(Cell::new(false));
            let on_resolve = ResolveOnce {
                target: target.clone(),
                resolve: resolve.clone(),
                reject: reject.clone(),
                called: called.clone(),
            };
            let on_reject = RejectOnce {
                reject: reject.clone(),
                called: called.clone(),
            };
            if let Err(reason) = thenable.then(on_resolve, on_reject) {
                if called.replace(true) {
                    debug!("thenable failed after settling its target, error suppressed");
                } else {
                    reject.reject(reason);
                }
            }
        }
        Resolution::Value(value) => resolve.resolve(value),
    }
}

#[cfg(test)]
mod tests {
    use super::{RejectOnce, ResolveOnce, Resolution, Thenable};
    use crate::{queue, Promise, State};
    use std::{cell::RefCell, rc::Rc};

    // A thenable that settles whatever callbacks it gets later, on demand.
    struct Lazy {
        callbacks: RefCell<Vec<(ResolveOnce<i32, String>, RejectOnce<i32, String>)>>,
    }

    impl Thenable<i32, String> for Rc<Lazy> {
        fn then(
            &self,
            resolve: ResolveOnce<i32, String>,
            reject: RejectOnce<i32, String>,
        ) -> Result<(), String> {
            self.callbacks.borrow_mut().push((resolve, reject));
            Ok(())
        }
    }

    #[test]
    fn test_plain_value_fulfills() {
        let promise = Promise::<i32, String>::resolve(1).and_then(|_| Ok(Resolution::Value(2)));
        queue::run_until_stalled();
        assert_eq!(promise.result(), Some(Ok(2)));
    }

    #[test]
    fn test_self_resolution_is_a_cycle() {
        let slot: Rc<RefCell<Option<Promise<i32, String>>>> = Rc::new(RefCell::new(None));
        let me = slot.clone();
        let derived = Promise::<i32, String>::resolve(1).and_then(move |_| {
            match me.borrow().clone() {
                Some(promise) => Ok(Resolution::Promise(promise)),
                None => Ok(Resolution::Value(0)),
            }
        });
        *slot.borrow_mut() = Some(derived.clone());

        queue::run_until_stalled();
        assert_eq!(
            derived.result(),
            Some(Err("chaining cycle detected for promise".to_string()))
        );
    }

    #[test]
    fn test_follows_nested_promises() {
        let inner = Promise::<i32, String>::deferred();
        let waiting = inner.promise.clone();
        let derived =
            Promise::<i32, String>::resolve(0).and_then(move |_| Ok(Resolution::Promise(waiting)));
        queue::run_until_stalled();
        assert!(derived.is_pending());

        inner.resolve.resolve(11);
        queue::run_until_stalled();
        assert_eq!(derived.result(), Some(Ok(11)));
    }

    #[test]
    fn test_follows_rejected_promise() {
        let derived = Promise::<i32, String>::resolve(0)
            .and_then(|_| Ok(Resolution::Promise(Promise::<i32, String>::reject("inner".into()))));
        queue::run_until_stalled();
        assert_eq!(derived.result(), Some(Err("inner".to_string())));
    }

    #[test]
    fn test_first_thenable_call_wins() {
        let thenable = Resolution::<i32, String>::from_fn(|resolve, reject| {
            resolve.fulfill(1);
            resolve.fulfill(2);
            reject.reject("late".into());
            Ok(())
        });
        let promise = Promise::<i32, String>::resolve_with(thenable);
        assert_eq!(promise.result(), Some(Ok(1)));
    }

    #[test]
    fn test_reject_first_wins_over_resolve() {
        let thenable = Resolution::<i32, String>::from_fn(|resolve, reject| {
            reject.reject("first".into());
            resolve.fulfill(2);
            Ok(())
        });
        let promise = Promise::<i32, String>::resolve_with(thenable);
        assert_eq!(promise.result(), Some(Err("first".to_string())));
    }

    #[test]
    fn test_thenable_failure_rejects() {
        let thenable = Resolution::<i32, String>::from_fn(|_, _| {
            Err("then threw".into())
        });
        let promise = Promise::<i32, String>::resolve_with(thenable);
        assert_eq!(promise.state(), State::Rejected);
        assert_eq!(promise.result(), Some(Err("then threw".to_string())));
    }

    #[test]
    fn test_thenable_failure_after_resolve_is_suppressed() {
        let thenable = Resolution::<i32, String>::from_fn(|resolve, _| {
            resolve.fulfill(3);
            Err("then threw".into())
        });
        let promise = Promise::<i32, String>::resolve_with(thenable);
        assert_eq!(promise.result(), Some(Ok(3)));
    }

    #[test]
    fn test_thenable_resolving_to_a_promise() {
        let thenable = Resolution::<i32, String>::from_fn(|resolve, _| {
            resolve.resolve(Promise::<i32, String>::resolve(8));
            Ok(())
        });
        let promise = Promise::<i32, String>::resolve_with(thenable);
        queue::run_until_stalled();
        assert_eq!(promise.result(), Some(Ok(8)));
    }

    #[test]
    fn test_thenable_resolving_to_target_is_a_cycle() {
        let lazy = Rc::new(Lazy {
            callbacks: RefCell::new(vec![]),
        });
        let thenable = Resolution::<i32, String>::thenable(lazy.clone());
        let promise = Promise::<i32, String>::resolve_with(thenable);
        assert!(promise.is_pending());

        let (resolve, reject) = lazy.callbacks.borrow_mut().remove(0);
        resolve.resolve(promise.clone());
        reject.reject("ignored".into());
        assert_eq!(
            promise.result(),
            Some(Err("chaining cycle detected for promise".to_string()))
        );
    }

    #[test]
    fn test_late_thenable_settlement() {
        let lazy = Rc::new(Lazy {
            callbacks: RefCell::new(vec![]),
        });
        let handle = lazy.clone();
        let derived = Promise::<i32, String>::resolve(0)
            .and_then(move |_| Ok(Resolution::<i32, String>::thenable(lazy)));
        queue::run_until_stalled();
        assert!(derived.is_pending());

        let (resolve, _) = handle.callbacks.borrow_mut().remove(0);
        resolve.fulfill(4);
        assert_eq!(derived.result(), Some(Ok(4)));
    }
}
