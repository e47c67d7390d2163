//! Watch command - follow a post through the HTTP feed

use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use threadline_adapters::http::{HttpAssetUploader, HttpDiscussionApi, HttpPollingFeed};
use threadline_adapters::state::SqliteInteractionRepo;
use threadline_domain::PostId;
use threadline_domain::usecases::{DiscussionController, DiscussionUpdate};

use crate::args::WatchArgs;
use crate::config::AppConfig;
use crate::render;

pub async fn execute(args: WatchArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let policy = config.reply_policy()?;
    let token = config.load_token();
    if token.is_none() {
        tracing::warn!(env = %config.backend.token_env, "No backend token set, requests are anonymous");
    }

    let post_id = PostId::from(args.post.as_str());
    let base_url = config.backend.base_url.clone();

    let feed = Arc::new(HttpPollingFeed::new(
        base_url.clone(),
        token.clone(),
        Duration::from_secs(config.backend.poll_interval_secs.max(1)),
    ));
    let api = Arc::new(HttpDiscussionApi::with_timeout(
        base_url,
        token.clone(),
        Duration::from_secs(config.backend.timeout_secs),
    ));
    let uploader = Arc::new(
        HttpAssetUploader::new(config.upload_base_url().to_string(), token)
            .with_chunk_size(config.upload.chunk_size),
    );
    let repo = Arc::new(
        SqliteInteractionRepo::new(&config.general.state_db_path)
            .await
            .context("Failed to open interaction ledger")?,
    );

    tracing::info!(
        post_id = %post_id,
        backend = %config.backend.base_url,
        once = args.once,
        "Starting watch"
    );

    let mut controller = DiscussionController::open(
        post_id.clone(),
        config.viewer(),
        feed,
        api,
        uploader,
        repo,
        policy,
    )
    .await
    .with_context(|| format!("Failed to subscribe to post {}", post_id))?;

    let result = loop {
        let update = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                break Ok(());
            }
            update = controller.next_event() => update,
        };

        match update {
            Some(DiscussionUpdate::RepliesReplaced { version, count }) => {
                tracing::debug!(version, count, "Snapshot applied");
                if let Some(post) = controller.post() {
                    print!("{}", render::post_text(post, Some(controller.ledger())));
                }
                println!("-- version {} ({} replies) --", version, count);
                print!(
                    "{}",
                    render::forest_text(controller.forest(), Some(controller.ledger()))
                );
                println!();

                if args.once {
                    break Ok(());
                }
            }
            Some(DiscussionUpdate::FeedEnded(stream)) => {
                break Err(anyhow!(
                    "The {:?} feed for post {} ended",
                    stream,
                    post_id
                ));
            }
            Some(_) => {}
            None => break Ok(()),
        }
    };

    controller.close().await;
    result
}
