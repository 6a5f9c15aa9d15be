//! Links a stored thumbnail back onto its photo's metadata record.
//!
//! The link is a single conditional patch: `thumbId` and `dimensions` are
//! written only if the photo has no `thumbId` yet, or already carries the
//! same one. A photo linked to a different thumbnail is never touched.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::StoreError;
use crate::store::{BlobStore, ConditionalUpdate, Guard, Metadata, ObjectId, PatchOutcome};
use crate::types::{Dimensions, DIMENSIONS_KEY, THUMB_ID_KEY};

/// Result of a link attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The photo now references the thumbnail.
    Linked,
    /// The photo already referenced this exact thumbnail.
    AlreadyLinked,
    /// The photo references a different thumbnail; nothing was written.
    Conflict { existing: String },
    /// The photo record does not exist.
    PhotoMissing,
}

impl LinkOutcome {
    /// Whether the photo ends up with a thumbnail linked, ours or not.
    pub fn is_complete(&self) -> bool {
        !matches!(self, LinkOutcome::PhotoMissing)
    }
}

/// Issues the conditional `thumbId` patch against the originals bucket.
#[derive(Clone)]
pub struct MetadataLinker {
    store: Arc<dyn BlobStore>,
    bucket: String,
}

impl MetadataLinker {
    pub fn new(store: Arc<dyn BlobStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub async fn link(
        &self,
        photo_id: &ObjectId,
        thumb_id: &ObjectId,
        dimensions: Option<Dimensions>,
    ) -> Result<LinkOutcome, StoreError> {
        let update = link_update(thumb_id, dimensions);
        let outcome = self
            .store
            .patch_metadata(&self.bucket, photo_id, &update)
            .await?;

        let outcome = match outcome {
            PatchOutcome::Applied => LinkOutcome::Linked,
            PatchOutcome::Unchanged => LinkOutcome::AlreadyLinked,
            PatchOutcome::GuardFailed { current } => LinkOutcome::Conflict {
                existing: match current {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                },
            },
            PatchOutcome::NotFound => LinkOutcome::PhotoMissing,
        };
        tracing::debug!(%photo_id, %thumb_id, ?outcome, "Link attempted");
        Ok(outcome)
    }
}

fn link_update(thumb_id: &ObjectId, dimensions: Option<Dimensions>) -> ConditionalUpdate {
    let mut set = Metadata::new();
    set.insert(THUMB_ID_KEY.into(), json!(thumb_id.as_str()));
    if let Some(dims) = dimensions {
        set.insert(
            DIMENSIONS_KEY.into(),
            json!({ "width": dims.width, "height": dims.height }),
        );
    }
    ConditionalUpdate {
        guard: Guard::AbsentOrEquals {
            key: THUMB_ID_KEY.into(),
            value: json!(thumb_id.as_str()),
        },
        set,
    }
}
