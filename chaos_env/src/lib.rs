//! Chaos Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the fault-injection
//! engine to run in both **Production** (tokio) and **Simulation** (virtual clock)
//! environments.
//!
//! # Core Concept
//!
//! Every experiment is a sequence of timed waits around remote calls:
//! - Time (`now()`, `sleep()`, `timeout()`)
//! - Background work (`spawn()`) for health probes
//!
//! By routing all of these through [`ChaosContext`], a whole experiment
//! (ramp, cycles, convergence polling) can be replayed deterministically.
//!
//! # Example
//!
//! ```ignore
//! use chaos_env::{ChaosContext, TokioContext};
//!
//! async fn interval_wait<Ctx: ChaosContext>(ctx: &Ctx, interval: Duration) {
//!     let started = ctx.now();
//!     ctx.sleep(interval).await;
//!     tracing::info!("waited {:?}", ctx.now() - started);
//! }
//! ```

mod context;
mod types;
mod error;
mod tokio_impl;

pub use context::ChaosContext;
pub use types::{RunId, TargetKind, TargetRef};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
