use std::{collections::HashSet, fmt};

use parking_lot::RwLock;

use crate::error::{SlbError, SlbResult};

type Terminate = Box<dyn Fn(&str) + Send + Sync>;

/// Services whose load balancers were deleted by this process.
///
/// Built once at startup and shared by reference between reconcilers.
/// Entries are never removed: a service uid is never reused, so a create
/// request for a deleted uid can only come from a stale event.
pub struct DeletedServices {
    uids: RwLock<HashSet<String>>,
    terminate: Terminate,
}

impl Default for DeletedServices {
    fn default() -> Self {
        Self::with_terminate(|_| std::process::abort())
    }
}

impl fmt::Debug for DeletedServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletedServices")
            .field("uids", &*self.uids.read())
            .finish_non_exhaustive()
    }
}

impl DeletedServices {
    /// Registry that aborts the process on a create for a deleted service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry calling `terminate` with the uid instead of aborting.
    #[must_use]
    pub fn with_terminate(terminate: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            uids: RwLock::default(),
            terminate: Box::new(terminate),
        }
    }

    pub fn mark(&self, uid: &str) {
        tracing::debug!("Marking service {} as deleted", uid);
        self.uids.write().insert(uid.to_string());
    }

    #[must_use]
    pub fn contains(&self, uid: &str) -> bool {
        self.uids.read().contains(uid)
    }

    /// Called right before a load balancer is created for `uid`.
    ///
    /// A create for a deleted service means events are processed out of
    /// order, and the load balancer would never be cleaned up. The
    /// process is aborted, a panic would only end the reconcile task.
    /// The error is returned when a custom terminate hook returns.
    pub fn assert_not_deleted(&self, uid: &str) -> SlbResult<()> {
        if !self.contains(uid) {
            return Ok(());
        }
        tracing::error!(
            "Load balancer requested for service {} which was already deleted. Terminating",
            uid
        );
        (self.terminate)(uid);
        Err(SlbError::ServiceDeleted(uid.to_string()))
    }
}
