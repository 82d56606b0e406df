//! Promise/A+ deferred values for single-threaded hosts.
//!
//! A [`Promise`] starts pending, settles exactly once, and runs the
//! continuations attached to it on a later turn of a [`queue::Schedule`],
//! never synchronously. Handlers may hand back plain values, other promises
//! or foreign [`Thenable`]s; the resolution procedure unwraps them and
//! rejects a promise that would wait on itself.
//!
//! Combinators ([`Promise::all`], [`Promise::any`],
//! [`Promise::all_settled`], [`Promise::race`]) are built from construction
//! and `then` alone.
//!
//! Promises are also `std::future::Future`s, so any executor can await them.
//!
//! # Examples
//!
//! ```
//! use promise_aplus::{Promise, Resolution};
//! use futures::executor::block_on;
//!
//! let (tx, rx) = {
//!     let deferred = Promise::<String, String>::deferred();
//!     (deferred.resolve, deferred.promise)
//! };
//! let greeting = rx.and_then(|name| Ok(Resolution::Value(format!("hello {}", name))));
//! tx.resolve("🍓".into());
//! assert_eq!(block_on(greeting), Ok("hello 🍓".to_string()));
//! ```

pub mod combinators;
pub mod error;
pub mod promise;
pub mod queue;
pub mod resolution;

pub use combinators::Outcome;
pub use error::{AggregateError, Error};
pub use promise::{Deferred, Handler, Promise, Rejecter, Resolver, State};
pub use resolution::{RejectOnce, ResolveOnce, Resolution, Thenable};
