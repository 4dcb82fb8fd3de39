//! Per-request credential scoping.
//!
//! Tool handlers obtain their API client through one shared accessor
//! ([`ClientFactory::client`](crate::api::ClientFactory::client)) and never
//! receive a credential parameter. The HTTP transports instead run each
//! request's dispatch chain inside [`run_with_credential`], and the factory
//! reads the value back with [`current_credential`].
//!
//! The value lives in a Tokio task-local, so it is bound to the logical task
//! that is polling the future, not to an OS thread. It stays attached across
//! every `.await` inside the scope, and two interleaved requests on the same
//! runtime thread each see only their own value.
//!
//! Task-locals are not inherited by `tokio::spawn`. Code that fans work out
//! to new tasks must use [`spawn_with_current_credential`].

use std::future::Future;

use tokio::task::JoinHandle;

tokio::task_local! {
    static REQUEST_CREDENTIAL: String;
}

/// Runs `future` with `credential` as the current request credential.
///
/// Nested calls shadow the outer value for their own extent. An empty string
/// is a valid scope value and means "use the shared fallback credential".
pub async fn run_with_credential<F>(credential: impl Into<String>, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_CREDENTIAL.scope(credential.into(), future).await
}

/// Returns the credential of the innermost enclosing
/// [`run_with_credential`] scope on the current task, or `None` outside any
/// scope.
#[must_use]
pub fn current_credential() -> Option<String> {
    REQUEST_CREDENTIAL.try_with(Clone::clone).ok()
}

/// Spawns `future` on the runtime, carrying the caller's credential scope
/// (if any) into the new task.
pub fn spawn_with_current_credential<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current_credential() {
        Some(credential) => tokio::spawn(REQUEST_CREDENTIAL.scope(credential, future)),
        None => tokio::spawn(future),
    }
}

/// Extracts the token from an `Authorization` header value.
///
/// Accepts `Bearer <token>` with a case-insensitive scheme. Anything else,
/// including a missing header, yields an empty string.
#[must_use]
pub fn bearer_token(header: Option<&str>) -> String {
    let Some(value) = header else {
        return String::new();
    };

    let value = value.trim();
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => {
            token.trim().to_string()
        }
        _ => String::new(),
    }
}
