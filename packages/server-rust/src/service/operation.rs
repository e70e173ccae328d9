//! Typed operations flowing through the broker pipeline.
//!
//! The transport decodes a request into a [`BrokerRequest`], the
//! [`OperationService`](super::classify::OperationService) classifies it into an
//! [`Operation`] carrying an [`OperationContext`], and the domain service turns
//! it into an [`OperationResponse`] or an [`OperationError`].

use std::sync::Arc;
use std::time::Instant;

use osbroker_core::{
    BindDetails, BindResponse, BrokerError, Catalog, DeprovisionDetails, DeprovisionResponse,
    LastOperation, ProvisionDetails, ProvisionResponse, UnbindDetails, UpdateDetails,
    UpdateResponse,
};

/// Names of the broker verbs, used as span and log labels.
pub mod verbs {
    pub const CATALOG: &str = "catalog";
    pub const PROVISION: &str = "provision";
    pub const UPDATE: &str = "update";
    pub const DEPROVISION: &str = "deprovision";
    pub const BIND: &str = "bind";
    pub const UNBIND: &str = "unbind";
    pub const LAST_OPERATION: &str = "last_operation";
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A decoded, not yet validated transport request.
#[derive(Debug, Clone)]
pub enum BrokerRequest {
    Catalog,
    Provision {
        instance_id: String,
        details: ProvisionDetails,
        accepts_incomplete: bool,
    },
    Update {
        instance_id: String,
        details: UpdateDetails,
        accepts_incomplete: bool,
    },
    Deprovision {
        instance_id: String,
        details: DeprovisionDetails,
        accepts_incomplete: bool,
    },
    Bind {
        instance_id: String,
        binding_id: String,
        details: BindDetails,
    },
    Unbind {
        instance_id: String,
        binding_id: String,
        details: UnbindDetails,
    },
    LastOperation {
        instance_id: String,
        operation: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    /// Verb label, one of [`verbs`].
    pub verb: &'static str,
    /// Transport request id, when the transport assigned one.
    pub request_id: Option<String>,
    pub received_at: Instant,
}

impl OperationContext {
    #[must_use]
    pub fn new(call_id: u64, verb: &'static str) -> Self {
        Self {
            call_id,
            verb,
            request_id: None,
            received_at: Instant::now(),
        }
    }
}

/// Classified broker operation.
#[derive(Debug)]
pub enum Operation {
    Catalog {
        ctx: OperationContext,
    },
    Provision {
        ctx: OperationContext,
        instance_id: String,
        details: ProvisionDetails,
        accepts_incomplete: bool,
    },
    Update {
        ctx: OperationContext,
        instance_id: String,
        details: UpdateDetails,
        accepts_incomplete: bool,
    },
    Deprovision {
        ctx: OperationContext,
        instance_id: String,
        details: DeprovisionDetails,
        accepts_incomplete: bool,
    },
    Bind {
        ctx: OperationContext,
        instance_id: String,
        binding_id: String,
        details: BindDetails,
    },
    Unbind {
        ctx: OperationContext,
        instance_id: String,
        binding_id: String,
        details: UnbindDetails,
    },
    LastOperation {
        ctx: OperationContext,
        instance_id: String,
        operation: Option<String>,
    },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Self::Catalog { ctx }
            | Self::Provision { ctx, .. }
            | Self::Update { ctx, .. }
            | Self::Deprovision { ctx, .. }
            | Self::Bind { ctx, .. }
            | Self::Unbind { ctx, .. }
            | Self::LastOperation { ctx, .. } => ctx,
        }
    }

    /// Whether the operation asks the driver to change the backing service.
    /// Catalog reads and `last_operation` polls do not.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Catalog { .. } | Self::LastOperation { .. })
    }

    /// The instance the operation targets. `None` for the catalog.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            Self::Catalog { .. } => None,
            Self::Provision { instance_id, .. }
            | Self::Update { instance_id, .. }
            | Self::Deprovision { instance_id, .. }
            | Self::Bind { instance_id, .. }
            | Self::Unbind { instance_id, .. }
            | Self::LastOperation { instance_id, .. } => Some(instance_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses and errors
// ---------------------------------------------------------------------------

/// Successful result of an operation.
#[derive(Debug, Clone)]
pub enum OperationResponse {
    Catalog(Arc<Catalog>),
    Provisioned(ProvisionResponse),
    Updated(UpdateResponse),
    Deprovisioned(DeprovisionResponse),
    Bound(BindResponse),
    Unbound,
    LastOperation(LastOperation),
}

/// Errors returned by the operation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("broker overloaded, try again later")]
    Overloaded,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Errors from classifying a [`BrokerRequest`] into an [`Operation`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
    #[error("identifier must not be empty: {field}")]
    EmptyIdentifier { field: &'static str },
}
