//! Handler registration: maps status-machine names to async callables.
//!
//! A handler advances a job one step. It receives the job's current status
//! and parameters and decides the next step; raising an error consumes one
//! unit of the attempt budget. Delivery is at-least-once, so handlers must
//! be idempotent at the granularity of `(status, params)`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;

use crate::job::Params;

/// A handler's verdict for one job step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Persist a continuation with the given status and parameters.
    Advance { status: String, params: Params },
    /// The chain is complete; persist a `done` continuation.
    Done,
}

impl Step {
    /// Continue the chain under `status` with fresh parameters.
    pub fn advance(status: impl Into<String>, params: Params) -> Step {
        Step::Advance {
            status: status.into(),
            params,
        }
    }

    /// Finish the chain.
    pub fn done() -> Step {
        Step::Done
    }
}

type BoxedHandler = Box<
    dyn Fn(String, Params) -> Pin<Box<dyn Future<Output = Result<Step>> + Send>> + Send + Sync,
>;

/// Registry of named handlers.
///
/// Only names present in the map are ever polled from the database; rows
/// with other names are left for workers that bind them.
///
/// # Example
///
/// ```ignore
/// let handlers = HandlerMap::new().bind("greet", |status, params| async move {
///     match status.as_str() {
///         "start" => Ok(Step::advance("sent", params)),
///         _ => Ok(Step::done()),
///     }
/// });
/// ```
#[derive(Default)]
pub struct HandlerMap {
    handlers: HashMap<String, BoxedHandler>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Bind `name` to an async handler. Rebinding a name replaces the
    /// previous handler.
    pub fn bind<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(String, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Step>> + Send + 'static,
    {
        self.handlers.insert(
            name.into(),
            Box::new(move |status, params| Box::pin(handler(status, params))),
        );
        self
    }

    pub(crate) fn get(&self, name: &str) -> Option<&BoxedHandler> {
        self.handlers.get(name)
    }

    /// The bound names, in arbitrary order.
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn bound_handler_is_invoked_with_status_and_params() {
        let handlers = HandlerMap::new().bind("echo", |status, params| async move {
            Ok(Step::advance(format!("saw-{status}"), params))
        });

        let handler = handlers.get("echo").expect("bound");
        let step = handler("start".into(), json!({"n": 1})).await.unwrap();
        assert_eq!(step, Step::advance("saw-start", json!({"n": 1})));
    }

    #[test]
    fn rebinding_replaces_and_names_dedupe() {
        let handlers = HandlerMap::new()
            .bind("a", |_, _| async { Ok(Step::done()) })
            .bind("a", |_, _| async { Ok(Step::done()) })
            .bind("b", |_, _| async { Ok(Step::done()) });

        let mut names = handlers.names();
        names.sort();
        assert_eq!(names, ["a", "b"]);
        assert!(handlers.get("c").is_none());
    }
}
