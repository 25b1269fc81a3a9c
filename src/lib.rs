//! csk: the daemonless, local-first workflow kernel that drives a
//! single software-delivery task through a chain of machine-enforced
//! gates — scope, verify, review, an optional e2e gate, then ready —
//! producing append-only, replayable proof of every transition.
//!
//! # Architecture
//!
//! - [`core`]: the kernel itself. Event log, task/slice engine, gates,
//!   status projector, replay checker, and validator, wired together
//!   behind the typed [`core::ops::Operation`] dispatch every command
//!   funnels through (spec.md §9 "typed operation dispatch").
//! - [`cli`]: the thin `clap`-derived front-end. It parses argv into an
//!   `Operation` and prints the decision envelope `core::envelope`
//!   builds; it contains no gate or lifecycle logic of its own.
//!
//! Every operation returns a decision envelope
//! (`summary/status/next/refs/errors/data`) so that an external agent —
//! human or AI — always has exactly one safe continuation (spec.md §6).

pub mod cli;
pub mod core;
