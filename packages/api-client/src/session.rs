//! Reaction to a server-side logout.

/// Default route a UI sends the user to after a 401.
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

/// Told when the server rejects the session, after credentials were
/// cleared. A UI implementation navigates to `login_route`.
pub trait SessionObserver: Send + Sync {
    fn session_expired(&self, login_route: &str);
}

/// Observer that only logs. Used when the caller registers none.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSessionObserver;

impl SessionObserver for LogSessionObserver {
    fn session_expired(&self, login_route: &str) {
        tracing::warn!(login_route, "Session expired; credentials cleared");
    }
}
