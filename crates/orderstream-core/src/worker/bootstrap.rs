use tracing::{debug, info};

use crate::error::{BootstrapError, StoreError};
use crate::store::LogStore;

/// Whether `ensure_group` created the group or found it in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Created,
    Existing,
}

/// Make sure `group` exists on `partition`, creating both if needed.
///
/// A new group starts at the tail, so entries appended before it existed are
/// never delivered to it. An existing group is left untouched.
#[tracing::instrument(skip(store))]
pub async fn ensure_group(
    store: &dyn LogStore,
    partition: &str,
    group: &str,
) -> Result<GroupStatus, BootstrapError> {
    match store.create_group(partition, group).await {
        Ok(()) => {
            info!(%partition, %group, "consumer group created");
            Ok(GroupStatus::Created)
        }
        Err(StoreError::GroupAlreadyExists(_)) => {
            debug!(%partition, %group, "consumer group already exists");
            Ok(GroupStatus::Existing)
        }
        Err(e) => Err(e.into()),
    }
}
