// # Built-in Notifiers
//
// Push providers live in their own crates. This module only carries the
// log-only notifier used when no push credentials are configured.

pub mod log;

pub use log::{LogNotifier, LogNotifierFactory};
