//! Load shedding for broker mutations.
//!
//! Provision, update, deprovision, bind, and unbind each hold a permit while
//! they run, because each may keep a driver call open against the backing
//! service. Once `max_concurrent_operations` are in flight further mutations
//! fail fast with `OperationError::Overloaded`, before the broker core takes
//! any instance lock or reserves a slot. Catalog reads and `last_operation`
//! polls are never shed: an orchestrator must always be able to learn how
//! earlier work ended.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Operation, OperationError, OperationResponse};

/// Permits and counters shared by every clone of the service.
#[derive(Debug)]
struct Admission {
    permits: Arc<Semaphore>,
    limit: usize,
    shed: AtomicU64,
}

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer that caps concurrent broker mutations.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    admission: Arc<Admission>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent_operations: u32) -> Self {
        let limit = max_concurrent_operations as usize;
        Self {
            admission: Arc::new(Admission {
                permits: Arc::new(Semaphore::new(limit)),
                limit,
                shed: AtomicU64::new(0),
            }),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            admission: Arc::clone(&self.admission),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    admission: Arc<Admission>,
}

impl<S> LoadShedService<S> {
    /// Mutations rejected since startup.
    #[must_use]
    pub fn shed_count(&self) -> u64 {
        self.admission.shed.load(Ordering::Relaxed)
    }

    /// Mutations currently holding a permit.
    #[must_use]
    pub fn mutations_in_flight(&self) -> usize {
        self.admission
            .limit
            .saturating_sub(self.admission.permits.available_permits())
    }
}

impl<S> Service<Operation> for LoadShedService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        if !op.is_mutation() {
            return Box::pin(self.inner.call(op));
        }

        let Ok(permit) = Arc::clone(&self.admission.permits).try_acquire_owned() else {
            let shed = self.admission.shed.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                verb = op.ctx().verb,
                instance_id = op.instance_id().unwrap_or_default(),
                limit = self.admission.limit,
                shed,
                "broker overloaded, shedding mutation"
            );
            return Box::pin(async { Err(OperationError::Overloaded) });
        };

        let fut = self.inner.call(op);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
