//! The `thumbsmith info` command.

use clap::Args;
use serde::Serialize;
use thumbsmith_core::{Config, Photo, Thumbnail, Thumbsmith};

/// Arguments for the `info` command.
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Photo id returned by `thumbsmith run`
    pub photo_id: String,
}

#[derive(Serialize)]
struct PhotoInfo {
    photo: Photo,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<Thumbnail>,
}

/// Execute the info command.
pub async fn execute(args: InfoArgs, config: Config) -> anyhow::Result<()> {
    let photo_id = super::parse_photo_id(&args.photo_id)?;
    let thumbsmith = Thumbsmith::open(config).await?;
    let catalog = thumbsmith.catalog();

    let Some(photo) = catalog.photo(&photo_id).await? else {
        anyhow::bail!("Photo not found: {photo_id}");
    };
    let thumbnail = match &photo.thumb_id {
        Some(thumb_id) => {
            let thumbnail = catalog.thumbnail(thumb_id).await?;
            if thumbnail.is_none() {
                tracing::warn!(%photo_id, %thumb_id, "Linked thumbnail is missing");
            }
            thumbnail
        }
        None => None,
    };

    let info = PhotoInfo { photo, thumbnail };
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
