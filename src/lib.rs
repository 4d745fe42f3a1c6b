// SPDX-License-Identifier: MIT

//! Cadence: an asynchronous workflow orchestration engine.
//!
//! Workflows are declared as dependency graphs of typed steps (agents,
//! transforms, conditions, delays, webhooks), validated for cycles up front,
//! and executed through a four-lane priority queue with retries, circuit
//! breaking and dead-lettering.

pub mod agents;
pub mod engine;
