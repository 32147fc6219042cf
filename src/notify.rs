//! User-facing console notices.
//!
//! Agents run detached, so the console is the one place a human
//! watching the run sees batch progress, attach hints, and merge
//! results. Notices go to stdout; diagnostics stay on the tracing
//! layer.

/// An informational notice about run progress.
pub fn info(message: &str) {
    println!("→ {message}");
    tracing::info!("{message}");
}

/// A task or branch reached a good end state.
pub fn success(message: &str) {
    println!("✓ {message}");
    tracing::info!("{message}");
}

/// A task or branch failed; the run continues.
pub fn failure(message: &str) {
    println!("✗ {message}");
    tracing::warn!("{message}");
}

/// Something needs human attention (preserved workspace, kept branch).
pub fn attention(message: &str) {
    println!("! {message}");
    tracing::warn!("{message}");
}
