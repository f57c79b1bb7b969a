// blescan Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Hook actions run around scan windows.

use log::error;
use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub(crate) type HookAction = Arc<dyn Fn() + Send + Sync>;

/// An ordered, append-only list of hook actions.
#[derive(Clone, Default)]
pub(crate) struct HookList {
    actions: Vec<HookAction>,
}

impl Debug for HookList {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("HookList")
            .field("len", &self.actions.len())
            .finish()
    }
}

impl HookList {
    /// Appends an action; duplicates are kept.
    pub fn push(&mut self, action: HookAction) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Runs every action in order. A panicking action is recorded and the rest still run.
    pub fn run(&self, stage: &str) -> HookReport {
        let mut report = HookReport {
            ran: self.actions.len(),
            failures: vec![],
        };
        for (index, action) in self.actions.iter().enumerate() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| action())) {
                let message = panic_message(payload.as_ref());
                error!("{} action #{} failed: {}", stage, index, message);
                report.failures.push(HookFailure { index, message });
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A hook action that panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    /// Position of the action in registration order.
    pub index: usize,
    /// The panic payload, or a placeholder when it was not a string.
    pub message: String,
}

/// Outcome of running one hook list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookReport {
    /// Number of actions invoked, failed ones included.
    pub ran: usize,
    /// Actions that panicked, in registration order.
    pub failures: Vec<HookFailure>,
}

impl HookReport {
    /// True when no action panicked.
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}
