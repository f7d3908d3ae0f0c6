//! The completion-stage primitive
//!
//! A [`Stage`] is a single-assignment result cell: created pending, it
//! moves exactly once to one of three terminal outcomes — fulfilled,
//! failed, or cancelled — and never transitions again (the obtrusion
//! escape hatch excepted). Stages are produced by background computation
//! on an [`Executor`], completed or cancelled by hand, awaited with the
//! blocking wait protocol, and chained into dependency graphs with the
//! combinator algebra.
//!
//! # Example
//!
//! ```rust
//! use stagekit::stage::Stage;
//!
//! let stage = Stage::supply(|| 5);
//! let label = stage.map(|n| "x".repeat(n));
//!
//! assert_eq!(label.get().unwrap(), "xxxxx");
//! ```
//!
//! [`Executor`]: crate::executor::Executor

mod combinators;
mod core;
mod future;
mod wait;

pub use self::core::{Outcome, Stage};
pub use self::future::StageFuture;
