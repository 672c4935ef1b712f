//! Process-wide panic policy.
//!
//! A panic anywhere in the server is logged and ends the process with
//! [`PANIC_EXIT_CODE`]. The one exception is code run through [`contain`]:
//! scheduled jobs use it so a panicking firing is logged by its runner and
//! the next firing still happens.

use std::any::Any;
use std::future::Future;

pub const PANIC_EXIT_CODE: i32 = 101;

tokio::task_local! {
    static CONTAINED: ();
}

/// Run `fut` with panics left to the caller's `catch_unwind`.
pub async fn contain<F: Future>(fut: F) -> F::Output {
    CONTAINED.scope((), fut).await
}

/// Whether the current task is inside [`contain`].
pub fn is_contained() -> bool {
    CONTAINED.try_with(|_| ()).is_ok()
}

/// Install the hook: log every panic, exit unless it is contained.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let exits = report_panic(&panic_message(info.payload()), &location, is_contained());
        if exits {
            std::process::exit(PANIC_EXIT_CODE);
        }
    }));
}

/// Log a panic. Returns `true` when the process must stop.
fn report_panic(message: &str, location: &str, contained: bool) -> bool {
    if contained {
        tracing::error!(panic = message, location, "Panic in contained task");
        false
    } else {
        tracing::error!(panic = message, location, "Uncaught panic; shutting down");
        true
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
