//! Task actions and the context they run with.

use std::marker::PhantomData;

use async_trait::async_trait;

use crate::cancel::CancelSignal;
use crate::domain::TaskId;
use crate::error::ActionError;

/// The unit of work a task executes.
///
/// Implementations check `ctx` at safe points; cancellation is never forced.
///
/// ```ignore
/// struct Compact;
///
/// #[async_trait]
/// impl TaskAction for Compact {
///     async fn execute(&self, ctx: TaskContext) -> Result<(), ActionError> {
///         for segment in segments() {
///             ctx.checkpoint()?;
///             compact(segment).await;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskAction: Send + Sync {
    async fn execute(&self, ctx: TaskContext) -> Result<(), ActionError>;
}

/// Explicit execution context handed to every action.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    label: Option<String>,
    cancel: CancelSignal,
}

impl TaskContext {
    pub(crate) fn new(task_id: TaskId, label: Option<String>, cancel: CancelSignal) -> Self {
        Self {
            task_id,
            label,
            cancel,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Safe point: `Err(ActionError::Cancelled)` once cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), ActionError> {
        if self.is_cancelled() {
            Err(ActionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested. Useful in `tokio::select!`.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Adapter turning an async closure into a `TaskAction`.
pub struct FnAction<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

pub fn action_fn<F, Fut>(f: F) -> FnAction<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    FnAction {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> TaskAction for FnAction<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    async fn execute(&self, ctx: TaskContext) -> Result<(), ActionError> {
        (self.f)(ctx).await
    }
}
