//! Who is asking: the initiating user for builds created in a request.

use std::future::Future;

use crate::model::User;

/// Resolves the user on whose behalf the engine is acting.
pub trait SecurityContext: Send + Sync {
    /// `None` for system-triggered work.
    fn logged_in_user(&self) -> Option<User>;
}

/// A fixed answer, for tests and for purely system-driven processes.
#[derive(Debug, Clone, Default)]
pub struct StaticSecurityContext {
    user: Option<User>,
}

impl StaticSecurityContext {
    pub fn system() -> Self {
        Self { user: None }
    }

    pub fn for_user(user: User) -> Self {
        Self { user: Some(user) }
    }
}

impl SecurityContext for StaticSecurityContext {
    fn logged_in_user(&self) -> Option<User> {
        self.user.clone()
    }
}

tokio::task_local! {
    static CURRENT_USER: Option<User>;
}

/// Reads the user from a task-local set by the request layer with
/// [`TaskLocalSecurityContext::scope`]. Outside a scope it reports no user.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskLocalSecurityContext;

impl TaskLocalSecurityContext {
    /// Runs `fut` with `user` as the logged-in user.
    pub async fn scope<F: Future>(user: Option<User>, fut: F) -> F::Output {
        CURRENT_USER.scope(user, fut).await
    }
}

impl SecurityContext for TaskLocalSecurityContext {
    fn logged_in_user(&self) -> Option<User> {
        CURRENT_USER.try_with(Clone::clone).ok().flatten()
    }
}
