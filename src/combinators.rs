//! Joining several promises into one.
//!
//! Every combinator takes a finite sequence of inputs, adopts each one with
//! [`Promise::resolve_with`] in order, and joins them using nothing but
//! construction and subscription. Each input is subscribed to while the
//! combined promise is built, so the first input to settle is the first one
//! observed, whatever its index.

use crate::{
    error::{AggregateError, Error},
    promise::{Promise, State},
    queue::{self, Schedule},
    resolution::Resolution,
};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

/// How one input of [`Promise::all_settled`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    Fulfilled { value: T },
    Rejected { reason: E },
}

impl<T, E> Outcome<T, E> {
    pub fn status(&self) -> State {
        match self {
            Outcome::Fulfilled { .. } => State::Fulfilled,
            Outcome::Rejected { .. } => State::Rejected,
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Outcome::Fulfilled { .. })
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Outcome::Fulfilled { value } => Ok(value),
            Outcome::Rejected { reason } => Err(reason),
        }
    }
}

fn adopt_all<T, E, I>(inputs: I) -> Vec<Promise<T, E>>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
    I: IntoIterator,
    I::Item: Into<Resolution<T, E>>,
{
    inputs
        .into_iter()
        .map(|input| Promise::<T, E>::resolve_with(input))
        .collect()
}

// The combined promise runs on its first input's scheduler.
fn scheduler_of<T, E>(inputs: &[Promise<T, E>]) -> Rc<dyn Schedule> {
    match inputs.first() {
        Some(input) => input.scheduler(),
        None => queue::current(),
    }
}

// Handlers below only settle the aggregate; the promises they derive are
// never observed.
fn done<E>() -> Result<Resolution<(), E>, E> {
    Ok(Resolution::Value(()))
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Fulfills with every input's value, in input order, once all inputs
    /// fulfilled. Rejects with the first rejection observed.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{Promise, Resolution};
    /// use futures::executor::block_on;
    ///
    /// let all: Promise<Vec<i32>, String> = Promise::all(vec![
    ///     Resolution::Value(1),
    ///     Promise::<i32, String>::resolve(2).into(),
    ///     Resolution::Value(3),
    /// ]);
    /// assert_eq!(block_on(all), Ok(vec![1, 2, 3]));
    /// ```
    pub fn all<I>(inputs: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let inputs: Vec<Promise<T, E>> = adopt_all(inputs);
        let scheduler = scheduler_of(&inputs);
        Promise::<Vec<T>, E>::new_in(scheduler, move |resolve, reject| {
            if inputs.is_empty() {
                resolve.resolve(Vec::new());
                return Ok(());
            }
            let values = Rc::new(RefCell::new(vec![None; inputs.len()]));
            let remaining = Rc::new(Cell::new(inputs.len()));
            for (index, input) in inputs.into_iter().enumerate() {
                let (values, remaining) = (values.clone(), remaining.clone());
                let (resolve, reject) = (resolve.clone(), reject.clone());
                input.subscribe(
                    move |value| {
                        values.borrow_mut()[index] = Some(value);
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            let values: Vec<T> = values.borrow_mut().drain(..).flatten().collect();
                            resolve.resolve(values);
                        }
                        done()
                    },
                    move |reason| {
                        reject.reject(reason);
                        done()
                    },
                );
            }
            Ok(())
        })
    }

    /// Fulfills with the first input to fulfill. Rejects only when every
    /// input rejected, with all reasons in input order.
    pub fn any<I>(inputs: I) -> Promise<T, AggregateError<E>>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let inputs: Vec<Promise<T, E>> = adopt_all(inputs);
        let scheduler = scheduler_of(&inputs);
        Promise::<T, AggregateError<E>>::new_in(scheduler, move |resolve, reject| {
            if inputs.is_empty() {
                reject.reject(AggregateError::new(Vec::new()));
                return Ok(());
            }
            let reasons = Rc::new(RefCell::new(vec![None; inputs.len()]));
            let remaining = Rc::new(Cell::new(inputs.len()));
            for (index, input) in inputs.into_iter().enumerate() {
                let (reasons, remaining) = (reasons.clone(), remaining.clone());
                let (resolve, reject) = (resolve.clone(), reject.clone());
                input.subscribe(
                    move |value| {
                        resolve.resolve(value);
                        done()
                    },
                    move |reason| {
                        reasons.borrow_mut()[index] = Some(reason);
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            let reasons: Vec<E> =
                                reasons.borrow_mut().drain(..).flatten().collect();
                            reject.reject(AggregateError::new(reasons));
                        }
                        done()
                    },
                );
            }
            Ok(())
        })
    }

    /// Fulfills once every input settled, with one [`Outcome`] per input in
    /// input order. Never rejects.
    pub fn all_settled<I>(inputs: I) -> Promise<Vec<Outcome<T, E>>, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let inputs: Vec<Promise<T, E>> = adopt_all(inputs);
        let scheduler = scheduler_of(&inputs);
        Promise::<Vec<Outcome<T, E>>, E>::new_in(scheduler, move |resolve, _| {
            if inputs.is_empty() {
                resolve.resolve(Vec::new());
                return Ok(());
            }
            let outcomes = Rc::new(RefCell::new(vec![None; inputs.len()]));
            let remaining = Rc::new(Cell::new(inputs.len()));
            for (index, input) in inputs.into_iter().enumerate() {
                let record = {
                    let (outcomes, remaining, resolve) =
                        (outcomes.clone(), remaining.clone(), resolve.clone());
                    move |outcome: Outcome<T, E>| {
                        outcomes.borrow_mut()[index] = Some(outcome);
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            let outcomes: Vec<Outcome<T, E>> =
                                outcomes.borrow_mut().drain(..).flatten().collect();
                            resolve.resolve(outcomes);
                        }
                    }
                };
                let on_rejected = record.clone();
                input.subscribe(
                    move |value| {
                        record(Outcome::Fulfilled { value });
                        done()
                    },
                    move |reason| {
                        on_rejected(Outcome::Rejected { reason });
                        done()
                    },
                );
            }
            Ok(())
        })
    }

    /// Settles the same way as the first input to settle. With no inputs it
    /// stays pending forever.
    pub fn race<I>(inputs: I) -> Promise<T, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let inputs: Vec<Promise<T, E>> = adopt_all(inputs);
        let scheduler = scheduler_of(&inputs);
        Promise::<T, E>::new_in(scheduler, move |resolve, reject| {
            for input in inputs {
                let (resolve, reject) = (resolve.clone(), reject.clone());
                input.subscribe(
                    move |value| {
                        resolve.resolve(value);
                        done()
                    },
                    move |reason| {
                        reject.reject(reason);
                        done()
                    },
                );
            }
            Ok(())
        })
    }
}
