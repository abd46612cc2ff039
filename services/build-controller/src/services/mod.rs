pub mod access;
pub mod event_watcher;
pub mod garbage_collector;
pub mod job;
pub mod reconciler;
