/// Errors raised by the promise protocol itself.
///
/// Rejection reasons of a `Promise<T, E>` must be able to carry these, which
/// is why every reason type implements `From<Error>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A handler resolved a promise with that same promise.
    #[error("chaining cycle detected for promise")]
    ChainingCycle,
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

/// The rejection reason of [`Promise::any`](crate::Promise::any) when no input
/// fulfilled.
///
/// `errors` holds one reason per input, in input order, regardless of the
/// order in which the inputs actually rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("All promises were rejected")]
pub struct AggregateError<E> {
    pub errors: Vec<E>,
}

impl<E> AggregateError<E> {
    pub fn new(errors: Vec<E>) -> Self {
        AggregateError { errors }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

// Lets an aggregate be the reason type of a promise that can still hit a
// protocol error further down its chain.
impl<E: From<Error>> From<Error> for AggregateError<E> {
    fn from(err: Error) -> Self {
        AggregateError::new(vec![E::from(err)])
    }
}
