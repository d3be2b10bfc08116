/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The boundary to the embedder's virtual machine.
//!
//! The core orders transactions; executing them is the embedder's concern. A [`Vm`]
//! must be **deterministic**: executing the same form as the same address against
//! the same state must yield the same outcome on every peer, or the network forks.

use crate::cell::Cell;
use crate::consensus::state::State;
use crate::store::context::Context;
use crate::types::basic::Address;

/// The outcome of executing one form.
pub struct Outcome {
    /// The state after execution. Must equal the input state when `error` is set.
    pub state: State,

    /// The result value, or the error message value when `error` is set.
    pub value: Cell,

    /// An error code, if execution failed. See
    /// [`codes`](crate::consensus::block::codes).
    pub error: Option<String>,
}

impl Outcome {
    pub fn ok(state: State, value: Cell) -> Outcome {
        Outcome {
            state,
            value,
            error: None,
        }
    }

    pub fn error(state: State, code: &str, message: Cell) -> Outcome {
        Outcome {
            state,
            value: message,
            error: Some(code.to_owned()),
        }
    }
}

/// Deterministic transaction executor provided by the embedder.
pub trait Vm: Send + Sync + 'static {
    /// Execute `form` as `address` against `state`.
    ///
    /// Per-transaction resource caps are the implementation's responsibility; the
    /// server assumes every call returns in bounded time.
    fn execute(&self, cx: &Context, state: &State, address: Address, form: &Cell) -> Outcome;
}
