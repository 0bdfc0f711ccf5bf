//! Ctrl+C handling for the chat loop.
//!
//! The loop is usually blocked on a stdin read or an in-flight request, so
//! the handler runs the registered exit hook and terminates the process
//! directly rather than trying to unwind. Conversation state is never
//! persisted, so there is nothing to flush.

use std::sync::OnceLock;

static EXIT_HOOK: OnceLock<Box<dyn Fn() + Send + Sync>> = OnceLock::new();

/// Initializes the Ctrl+C handler.
///
/// # Panics
/// Panics if registering the Ctrl+C handler fails.
pub fn init() {
    ctrlc::set_handler(move || {
        if let Some(hook) = EXIT_HOOK.get() {
            hook();
        }
        std::process::exit(0);
    })
    .expect("Error setting Ctrl+C handler");
}

/// Registers the hook run on Ctrl+C before the process exits.
///
/// Typically prints the goodbye line and any pending update notice.
/// Only the first registration takes effect.
pub fn set_exit_hook<F>(hook: F)
where
    F: Fn() + Send + Sync + 'static,
{
    let _ = EXIT_HOOK.set(Box::new(hook));
}

/// Runs the exit hook without exiting. Used on the normal EOF exit path
/// so both exits print the same farewell.
pub fn run_exit_hook() {
    if let Some(hook) = EXIT_HOOK.get() {
        hook();
    }
}
