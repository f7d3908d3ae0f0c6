//! # stagekit
//!
//! > Completion stages for concurrent Rust
//!
//! **stagekit** provides a single-assignment future — the [`Stage`] — that
//! background computation produces, external code can force-complete,
//! cancel, or time out, and a combinator algebra chains into dependency
//! graphs of continuations.
//!
//! ## Quick Start
//!
//! ```rust
//! use stagekit::prelude::*;
//!
//! let stage = Stage::supply(|| 5);
//! let label = stage.map(|n| "x".repeat(n));
//!
//! assert_eq!(label.get().unwrap(), "xxxxx");
//! ```
//!
//! ## Features
//!
//! - 🧱 **Single-assignment stages** - exactly one transition out of pending
//! - 🔗 **Combinator algebra** - map / accept / combine / compose / handle / exceptionally
//! - ⏳ **Blocking wait protocol** - `get`, bounded `get`, `get_now`, `join`
//! - 🔌 **Injected executors** - thread pool, deterministic manual, inline
//! - 🔨 **Obtrusion** - a documented escape hatch that overwrites terminal state

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod executor;
pub mod stage;

mod timer;

/// Prelude for convenient imports
///
/// ```rust
/// use stagekit::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Result, StageError};
    pub use crate::executor::{
        default_executor, Executor, InlineExecutor, ManualExecutor, SharedExecutor, ThreadPool,
    };
    pub use crate::stage::{Outcome, Stage, StageFuture};
}

// Re-exports
pub use error::{Result, StageError};
pub use stage::Stage;
