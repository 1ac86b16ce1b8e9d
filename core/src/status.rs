//! Local node membership status with synchronous change notification

use schema::{MemberStatus, ViewInfo};
use tracing::info;

/// Receiver of node status notifications
///
/// Called synchronously from [`NodeStatus::set`], before the new status is
/// stored.
pub trait StatusSink {
    fn notify_status(&self, status: MemberStatus, view: Option<&ViewInfo>);
}

impl<F> StatusSink for F
where
    F: Fn(MemberStatus, Option<&ViewInfo>),
{
    fn notify_status(&self, status: MemberStatus, view: Option<&ViewInfo>) {
        self(status, view)
    }
}

/// Sink that only records transitions in the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn notify_status(&self, status: MemberStatus, view: Option<&ViewInfo>) {
        match view {
            Some(view) => info!(
                "Node status: {} (view {}, {} members, primary: {})",
                status,
                view.view_id,
                view.member_count(),
                view.is_primary()
            ),
            None => info!("Node status: {}", status),
        }
    }
}

/// Tracks the local node's membership status
#[derive(Debug)]
pub struct NodeStatus<S: StatusSink> {
    status: MemberStatus,
    sink: S,
}

impl<S: StatusSink> NodeStatus<S> {
    /// Start in [`MemberStatus::Undefined`]
    pub fn new(sink: S) -> Self {
        Self {
            status: MemberStatus::Undefined,
            sink,
        }
    }

    /// Record `new_status`, notifying the sink if it differs from the
    /// current status or a view snapshot is supplied
    pub fn set(&mut self, new_status: MemberStatus, view: Option<&ViewInfo>) {
        if self.status != new_status || view.is_some() {
            self.sink.notify_status(new_status, view);
            self.status = new_status;
        }
    }

    pub fn get(&self) -> MemberStatus {
        self.status
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl Default for NodeStatus<TracingSink> {
    fn default() -> Self {
        Self::new(TracingSink)
    }
}
