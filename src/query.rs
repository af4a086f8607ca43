use crate::error::{Error, Result};
use crate::executable::{Builder, Executable};
use crate::flow::FlowInner;
use serde_json::Value;
use std::sync::{Mutex, Weak};

/// Read-only lookup over a container's executables, resolving "find the
/// task(s) created by builder X" and "give me X's result".
///
/// All matching goes through [`Builder::is`], an identity comparison on
/// builder ids. The query holds its container weakly; using it after the
/// container was dropped is an invalid-state error.
#[derive(Clone)]
pub struct Query {
    flow: Weak<Mutex<FlowInner>>,
}

impl Query {
    pub(crate) fn new(flow: Weak<Mutex<FlowInner>>) -> Self {
        Self { flow }
    }

    fn snapshot(&self) -> Result<Vec<Executable>> {
        let flow = self.flow.upgrade().ok_or_else(|| {
            Error::invalid_state("query container no longer exists")
        })?;
        let inner = crate::lock(&flow);
        Ok(inner.order.clone())
    }

    /// First executable stamped by `builder`, scanning in insertion order
    pub fn find<B: Builder>(&self, builder: &B) -> Result<Option<Executable>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .find(|executable| builder.is(executable)))
    }

    /// Last executable stamped by `builder`
    pub fn find_last<B: Builder>(&self, builder: &B) -> Result<Option<Executable>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .rev()
            .find(|executable| builder.is(executable)))
    }

    /// Like [`find`](Self::find), but a miss is a not-found error
    pub fn get<B: Builder>(&self, builder: &B) -> Result<Executable> {
        self.find(builder)?.ok_or_else(|| Error::NotFound {
            builder: builder.builder_name().to_string(),
        })
    }

    /// Like [`find_last`](Self::find_last), but a miss is a not-found error
    pub fn get_last<B: Builder>(&self, builder: &B) -> Result<Executable> {
        self.find_last(builder)?.ok_or_else(|| Error::NotFound {
            builder: builder.builder_name().to_string(),
        })
    }

    /// Every executable stamped by `builder`, in insertion order
    pub fn get_all<B: Builder>(&self, builder: &B) -> Result<Vec<Executable>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter(|executable| builder.is(executable))
            .collect())
    }

    /// Result of the first match. Fails if no match exists or the matched
    /// task has no success result yet.
    pub fn get_result<B: Builder>(&self, builder: &B) -> Result<Value> {
        let executable = self.get(builder)?;
        require_result(&executable)
    }

    /// Result of the last match, with the same failure modes as
    /// [`get_result`](Self::get_result)
    pub fn get_last_result<B: Builder>(&self, builder: &B) -> Result<Value> {
        let executable = self.get_last(builder)?;
        require_result(&executable)
    }

    /// Results of every match, in insertion order; fails at the first match
    /// whose result is absent.
    pub fn get_results<B: Builder>(&self, builder: &B) -> Result<Vec<Value>> {
        self.get_all(builder)?
            .iter()
            .map(require_result)
            .collect()
    }
}

fn require_result(executable: &Executable) -> Result<Value> {
    executable.result().ok_or_else(|| Error::NoResult {
        task: executable.name().to_string(),
    })
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("alive", &(self.flow.strong_count() > 0))
            .finish()
    }
}
