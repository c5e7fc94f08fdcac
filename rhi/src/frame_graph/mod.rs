//! Frame graph command recording.
//!
//! The frame graph orders scopes and decides how each is recorded. This
//! module is the boundary where that plan turns into command lists:
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Scope`] | A unit of GPU work with its queue dependencies |
//! | [`FrameGraphExecuteGroup`] | Contexts recording primary command lists |
//! | [`FrameGraphExecuteGroupSecondary`] | Contexts recording secondary lists inside a render pass |
//! | [`FrameGraphExecuteContext`] | One command list plus the submit range it covers |
//! | [`FrameGraphExecuter`] | Records groups and submits them in frame order |
//!
//! A group's [`JobPolicy`] states whether its contexts may be recorded at
//! the same time. Overlapping contexts under [`JobPolicy::Serial`] are a
//! programming error, caught by the group's active counter in debug builds.
//!
//! # Example
//!
//! ```ignore
//! let group = FrameGraphExecuteGroup::standard(device, scope, 4, JobPolicy::Parallel);
//! group.begin()?;
//! // On worker threads, one context each:
//! group.begin_context(i)?;
//! group.execute_context(i)?;
//! group.end_context(i)?;
//! // After the last end_context:
//! assert!(group.is_submittable());
//! ```

mod context;
mod executer;
mod group;
mod scope;
mod secondary;

pub use context::FrameGraphExecuteContext;
pub use executer::FrameGraphExecuter;
pub use group::{
    ContextInfo, ContextState, ExecuteGroup, ExecuteGroupBase, FrameGraphExecuteGroup, JobPolicy,
};
pub use scope::{FenceWait, Scope, ScopeDescriptor, SubmitRange};
pub use secondary::FrameGraphExecuteGroupSecondary;
