//! CLI subcommands.

pub mod config;
pub mod export;
pub mod info;
pub mod run;

use thumbsmith_core::ObjectId;

/// Parse a photo id argument.
pub(crate) fn parse_photo_id(raw: &str) -> anyhow::Result<ObjectId> {
    ObjectId::parse(raw.trim())
        .ok_or_else(|| anyhow::anyhow!("Invalid photo id '{raw}': expected 24 hex digits"))
}
