use clap::Args;
use serde::Serialize;

use dominion::defaults;
use dominion::tag::{self, ImageTag};

use super::CmdResult;

#[derive(Args)]
pub struct TagArgs {
    /// Use this tag verbatim instead of generating one
    #[arg(long)]
    pub image_version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TagOutput {
    command: String,
    #[serde(flatten)]
    tag: ImageTag,
    image: String,
    timestamp: bool,
}

pub fn run(args: TagArgs) -> CmdResult<TagOutput> {
    let defaults = defaults::load_defaults();
    let resolved = tag::resolve(args.image_version.as_deref(), chrono::Utc::now());
    let image = tag::image_reference(
        &defaults.image.registry,
        &defaults.image.repository,
        &resolved.value,
    );

    Ok((
        TagOutput {
            command: "tag".to_string(),
            timestamp: tag::is_timestamp_tag(&resolved.value),
            tag: resolved,
            image,
        },
        0,
    ))
}
