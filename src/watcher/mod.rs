//! The fan-out loop and its observer handles.

mod all_watcher;
mod observer;

pub use all_watcher::AllWatcher;
pub use all_watcher::AllWatcherHandle;
pub use all_watcher::WatcherId;
pub use observer::StateWatcher;

#[cfg(test)]
mod observer_test;
