// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Ordered steps with compensations
//!
//! Each step runs immediately. When it succeeds its compensation is
//! remembered; when one fails, every remembered compensation runs in
//! reverse order before the error is handed back. Compensation failures
//! are logged and skipped.

use futures::future::{BoxFuture, FutureExt};
use std::fmt::Display;
use std::future::Future;
use tracing::{info, warn};

pub type Compensation = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

/// Wrap an async undo action
pub fn compensate<F, Fut>(undo: F) -> Option<Compensation>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Some(Box::new(move || undo().boxed()))
}

pub struct Saga {
    name: String,
    completed: Vec<(&'static str, Option<Compensation>)>,
}

impl Saga {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), completed: Vec::new() }
    }

    /// Run `action`. On failure everything done so far is undone.
    pub async fn step<T, E, Fut>(
        &mut self,
        label: &'static str,
        action: Fut,
        compensation: Option<Compensation>,
    ) -> Result<T, E>
    where
        E: Display,
        Fut: Future<Output = Result<T, E>>,
    {
        match action.await {
            Ok(value) => {
                info!("{}: {} done", self.name, label);
                self.completed.push((label, compensation));
                Ok(value)
            }
            Err(e) => {
                warn!("{}: {} failed: {}, rolling back {} step(s)", self.name, label, e, self.completed.len());
                self.unwind().await;
                Err(e)
            }
        }
    }

    /// Labels of the steps that have succeeded, in order
    pub fn completed(&self) -> Vec<&'static str> {
        self.completed.iter().map(|(label, _)| *label).collect()
    }

    /// Run compensations newest-first
    pub async fn unwind(&mut self) {
        while let Some((label, compensation)) = self.completed.pop() {
            let Some(undo) = compensation else { continue };
            match undo().await {
                Ok(()) => info!("{}: rolled back {}", self.name, label),
                Err(e) => warn!("{}: rollback of {} failed: {}", self.name, label, e),
            }
        }
    }
}
