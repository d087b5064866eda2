//! # Cinnabar
//!
//! A dataflow workflow kernel. Actors are wired into workflows through
//! URI-addressed channels, and a pluggable director runs every node until the
//! workflow has nothing left to do.
//!
//! ## Features
//!
//! - **Actors with a checked lifecycle**: every lifecycle call is validated against
//!   the actor's state, and null values are rejected unless a port allows them
//! - **URI-addressed dataflow**: outflows publish at templates such as
//!   `/product/{i}`, and inflows subscribe to matching templates, binding `{i}`
//! - **Pluggable directors**: data-driven with hidden buffers, publish-subscribe
//!   queues, or a concurrent variant that keeps several steps of a node in flight
//! - **Nested workflows**: a workflow is itself an actor and can sit on a node of
//!   another workflow
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cinnabar::prelude::*;
//!
//! # async fn run() -> Result<(), WorkflowError> {
//! let multiplier = Actor::new(FnActor::new(|ctx| {
//!     let a: i64 = ctx.input_as("a")?;
//!     let b: i64 = ctx.input_as("b")?;
//!     ctx.set_output("c", json!(a * b))?;
//!     Ok(())
//! }))
//! .with_input("a", InputSignature::new())
//! .with_input("b", InputSignature::new())
//! .with_output("c", OutputSignature::new());
//!
//! let mut workflow = WorkflowBuilder::new("Multiply")
//!     .director(DataDrivenDirector::new())
//!     .node(
//!         NodeBuilder::new("Multiply")
//!             .actor(multiplier)
//!             .constant("a", json!(3))
//!             .constant("b", json!(5))
//!             .outflow("c", "/product")
//!             .build(),
//!     )
//!     .output_flow("product", "/product")
//!     .build()?;
//!
//! let outputs = workflow.run(Variables::new()).await?;
//! assert_eq!(outputs["product"], json!(15));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`prelude`]: Commonly used types and traits (import with `use cinnabar::prelude::*`)
//! - [`data`]: Packets, URI templates, protocols and ports
//! - [`completion`]: The services that step actors sequentially or concurrently

// ============================================================================
// Core Module
// ============================================================================

mod core;

// ============================================================================
// Public Re-exports - Granular Imports
// ============================================================================

pub use core::{AsAny, NodeValue, Variables};

// Actors
pub use core::actor::logic::{ActorLogic, AsyncActorLogic, FnActor, StepContext};
pub use core::actor::signature::{InputSignature, OutputSignature};
pub use core::actor::state::ActorState;
pub use core::actor::status::ActorStatus;
pub use core::actor::{Actor, ActorCore, NodeBinding};

// Nodes
pub use core::node::{
    ActorWorkflowNode, BufferNode, InPortal, NodeBuilder, NodeCore, NonDeterministicMerge,
    OutPortal, SourceNode, WorkflowNode,
};

// Directors and workflows
pub use core::director::{
    ConcurrentDataDrivenDirector, DataDrivenDirector, Director, DirectorState,
    PublishSubscribeDirector,
};
pub use core::validation::{ValidationIssue, ValidationResult};
pub use core::workflow::{NodeInput, NodeOutput, Workflow, WorkflowBuilder, WorkflowGraph};
pub use core::wrapup::{BufferKind, UnusedDataRecord, WrapupResult};

// Ambient
pub use core::config::{ExceptionPolicy, ExecutionConfig};
pub use core::context::{WorkflowContext, WorkflowContextBuilder};
pub use core::error::{BoxError, Result, WorkflowError};
pub use core::telemetry::{
    MemoryTraceRecorder, NoopTraceRecorder, TraceEvent, TraceEventKind, TraceRecorder,
};

pub use core::completion;
pub use core::data;

// ============================================================================
// Prelude Module - Convenient Bulk Imports
// ============================================================================

/// Everything needed to declare and run workflows.
///
/// # Example
/// ```rust
/// use cinnabar::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        // Actors
        Actor,
        ActorLogic,
        ActorState,
        AsyncActorLogic,
        BoxError,
        // Directors
        ConcurrentDataDrivenDirector,
        DataDrivenDirector,
        Director,
        ExceptionPolicy,
        ExecutionConfig,
        FnActor,
        InPortal,
        InputSignature,
        MemoryTraceRecorder,
        NodeBuilder,
        NodeValue,
        NonDeterministicMerge,
        OutPortal,
        OutputSignature,
        PublishSubscribeDirector,
        StepContext,
        TraceEventKind,
        TraceRecorder,
        Variables,
        // Workflows
        Workflow,
        WorkflowBuilder,
        WorkflowContext,
        WorkflowError,
        WorkflowNode,
        WrapupResult,
    };
    pub use serde_json::json;
}

// ============================================================================
// Library Metadata
// ============================================================================

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
