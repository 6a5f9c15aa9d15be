//! The `thumbsmith export` command: write a photo's thumbnail to disk.

use std::path::{Path, PathBuf};

use clap::Args;
use thumbsmith_core::ingest::extension_for;
use thumbsmith_core::{Config, Thumbnail, Thumbsmith};

/// Arguments for the `export` command.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Photo id returned by `thumbsmith run`
    pub photo_id: String,

    /// Output file, or a directory to write `<photoId>_thumb.<ext>` into
    #[arg(default_value = ".")]
    pub output: PathBuf,
}

/// Execute the export command.
pub async fn execute(args: ExportArgs, config: Config) -> anyhow::Result<()> {
    let photo_id = super::parse_photo_id(&args.photo_id)?;
    let thumbsmith = Thumbsmith::open(config).await?;
    let catalog = thumbsmith.catalog();

    if catalog.photo(&photo_id).await?.is_none() {
        anyhow::bail!("Photo not found: {photo_id}");
    }
    let Some(thumbnail) = catalog.thumbnail_for(&photo_id).await? else {
        anyhow::bail!("Photo {photo_id} has no thumbnail yet");
    };

    let bytes = catalog.read_thumbnail_bytes(&thumbnail.id).await?;
    let output = PathBuf::from(shellexpand::tilde(&args.output.to_string_lossy()).into_owned());
    let path = output_path(&output, &thumbnail);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(&path, &bytes).await?;

    tracing::info!(%photo_id, thumb_id = %thumbnail.id, bytes = bytes.len(), "Exported thumbnail");
    println!("{}", path.display());
    Ok(())
}

fn output_path(output: &Path, thumbnail: &Thumbnail) -> PathBuf {
    if output.is_dir() {
        let ext = extension_for(&thumbnail.content_type).unwrap_or("bin");
        output.join(format!("{}_thumb.{ext}", thumbnail.source_photo_id))
    } else {
        output.to_path_buf()
    }
}
