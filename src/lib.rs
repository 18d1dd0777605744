//! # opcua-engine: OPC UA Server Engine
//!
//! The protocol-independent core of an OPC UA server: the address space,
//! the subscription/publish engine and the historian, driven by a runtime
//! loop that hands decoded service requests to one handler per service.
//!
//! ## Design Principles
//!
//! 1. **Nodes are owned by the address space**: everything else refers to
//!    them by [`NodeId`], never by pointer
//! 2. **Clean DTOs**: [`Variant`], [`DataValue`], [`NodeId`] cross all boundaries
//! 3. **Traits at the seams**: [`HistoryBackend`], [`NodeContext`],
//!    [`AccessControl`], `Transport` and [`ServerHooks`] are the extension points
//! 4. **No lock across callbacks**: re-entrant mutations are queued and applied
//!    at the next safe point
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use opcua_engine::{ServerConfig, ServerRuntime, NodeId, Variant};
//!
//! # fn example() -> opcua_engine::Result<()> {
//! let runtime = ServerRuntime::new(ServerConfig::default())?;
//! let space = runtime.address_space();
//!
//! let folder = space.add_folder(&NodeId::OBJECTS, "Plant", 1)?;
//! let speed = space.add_variable(&folder, "Speed", 0.0f64, 1)?;
//! space.set_value(&speed, Variant::from(42.0))?;
//!
//! runtime.add_repeated_callback(std::time::Duration::from_secs(1), |rt, _id| {
//!     // periodic application work
//!     let _ = rt.address_space().node_count();
//! });
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `runtime` | yes | async `run()` loop and the `Transport` seam (tokio) |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod config;
pub mod context;
pub mod access;
pub mod address_space;
pub mod event;
pub mod history;
pub mod subscription;
pub mod runtime;
pub mod export;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    ids, AttributeId, BrowseDescription, BrowseDirection, BuiltinType, DataValue, LocalizedText,
    Node, NodeAttributes, NodeClass, NodeId, QualifiedName, Reference, ReferenceDescription,
    StatusCode, TimestampsToReturn, VariableAttributes, Variant,
};

// ============================================================================
// Re-exports: Engine components
// ============================================================================

pub use config::ServerConfig;
pub use context::{ContextRegistry, NodeContext};
pub use access::{AccessControl, DefaultAccessControl, PermissiveAccessControl};
pub use address_space::{AddNodeRequest, AddressSpace, BrowsePathResult, BrowsePathTarget};
pub use event::Event;
pub use history::{HistoryBackend, MemoryHistorian, ReadRawDetails};
pub use subscription::{SubscriptionEngine, SubscriptionId};
pub use runtime::{ServerHooks, ServerRegistry, ServerRuntime, SessionId, StopHandle, TimerId};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Node id already in use: {0}")]
    DuplicateId(NodeId),

    #[error("Reference already exists: {0}")]
    DuplicateReference(String),

    #[error("Invalid parent: {0}")]
    InvalidParent(NodeId),

    #[error("Invalid node attributes: {0}")]
    InvalidAttributes(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Attribute {attribute:?} not applicable to node {node}")]
    AttributeNotApplicable { node: NodeId, attribute: AttributeId },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(u32),

    #[error("Monitored item not found: {0}")]
    MonitoredItemNotFound(u32),

    #[error("Monitored item limit of {0} exceeded")]
    MonitoredItemLimitExceeded(usize),

    #[error("Subscription limit of {0} exceeded")]
    SubscriptionLimitExceeded(usize),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Session not found: {0}")]
    SessionNotFound(u32),

    #[error("Session limit of {0} exceeded")]
    SessionLimitExceeded(usize),

    #[error("Session has no subscriptions")]
    NoSubscription,

    #[error("Too many queued publish requests")]
    TooManyPublishRequests,

    #[error("Notification message {0} not available")]
    MessageNotAvailable(u32),

    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Invalid continuation point")]
    InvalidContinuationPoint,

    #[error("Method not found: {0}")]
    MethodNotFound(NodeId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Node context failed: {0}")]
    ContextFailure(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The protocol status code reported for this error in per-element
    /// service results.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NodeNotFound(_) => StatusCode::BAD_NODE_ID_UNKNOWN,
            Error::DuplicateId(_) => StatusCode::BAD_NODE_ID_EXISTS,
            Error::DuplicateReference(_) => StatusCode::BAD_DUPLICATE_REFERENCE_NOT_ALLOWED,
            Error::InvalidParent(_) => StatusCode::BAD_PARENT_NODE_ID_INVALID,
            Error::InvalidAttributes(_) => StatusCode::BAD_NODE_ATTRIBUTES_INVALID,
            Error::AccessDenied(_) => StatusCode::BAD_USER_ACCESS_DENIED,
            Error::TypeMismatch { .. } => StatusCode::BAD_TYPE_MISMATCH,
            Error::AttributeNotApplicable { .. } => StatusCode::BAD_ATTRIBUTE_ID_INVALID,
            Error::InvalidFilter(_) => StatusCode::BAD_MONITORED_ITEM_FILTER_INVALID,
            Error::SubscriptionNotFound(_) => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
            Error::MonitoredItemNotFound(_) => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
            Error::MonitoredItemLimitExceeded(_) => StatusCode::BAD_TOO_MANY_MONITORED_ITEMS,
            Error::SubscriptionLimitExceeded(_) => StatusCode::BAD_TOO_MANY_SUBSCRIPTIONS,
            Error::Timeout(_) => StatusCode::BAD_TIMEOUT,
            Error::SessionNotFound(_) => StatusCode::BAD_SESSION_ID_INVALID,
            Error::SessionLimitExceeded(_) => StatusCode::BAD_TOO_MANY_SESSIONS,
            Error::NoSubscription => StatusCode::BAD_NO_SUBSCRIPTION,
            Error::TooManyPublishRequests => StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS,
            Error::MessageNotAvailable(_) => StatusCode::BAD_MESSAGE_NOT_AVAILABLE,
            Error::ReferenceNotFound(_) => StatusCode::BAD_REFERENCE_NOT_FOUND,
            Error::InvalidContinuationPoint => StatusCode::BAD_CONTINUATION_POINT_INVALID,
            Error::MethodNotFound(_) => StatusCode::BAD_METHOD_INVALID,
            Error::InvalidArgument(_) => StatusCode::BAD_INVALID_ARGUMENT,
            Error::ContextFailure(_) => StatusCode::BAD_INTERNAL_ERROR,
            Error::NotSupported(_) => StatusCode::BAD_NOT_SUPPORTED,
            Error::Config(_) => StatusCode::BAD_CONFIGURATION_ERROR,
            Error::Io(_) | Error::Json(_) => StatusCode::BAD_INTERNAL_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
