//! Simulate command - scripted multi-user session on the in-memory backend

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use threadline_adapters::memory::{MemoryBackend, MemorySession, StubUploader};
use threadline_adapters::state::InMemoryInteractionRepo;
use threadline_domain::policy::ReplyPolicy;
use threadline_domain::usecases::{DiscussionController, DiscussionUpdate, ThreadEntry, UploadState};
use threadline_domain::{
    DiscussionApi, InteractionState, LocalFile, NewReply, Post, PostId, ReactionKind, Viewer,
    VoteKind,
};

use crate::args::SimulateArgs;
use crate::config::AppConfig;
use crate::render;

type Session =
    DiscussionController<MemorySession, MemorySession, StubUploader, InMemoryInteractionRepo>;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_EVENTS: usize = 200;

#[derive(Debug, Serialize)]
struct SimulationOutput {
    post: Post,
    tree: Vec<ThreadEntry>,
    ledger: InteractionState,
}

pub async fn execute(args: SimulateArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref()).unwrap_or_default();
    let policy = config.reply_policy()?;

    let backend = MemoryBackend::new();
    let alice = Viewer::new("alice", "Alice");
    let bob = Viewer::new("bob", "Bob");
    let carol = backend.session(Viewer::new("carol", "Carol"));

    let post_id = backend
        .create_post(
            &alice,
            "How do I share state between tasks?",
            "Several workers need the same cache.",
        )
        .context("Failed to create post")?;
    tracing::info!(post_id = %post_id, "Simulation started");

    let answer = carol
        .submit_reply(&NewReply {
            post_id: post_id.clone(),
            parent_reply_id: None,
            body: "Wrap it in an Arc<Mutex<_>> and clone the Arc into each task.".to_string(),
            media: vec![],
            mentions: vec![],
        })
        .await
        .context("Failed to seed reply")?;

    let repo = Arc::new(InMemoryInteractionRepo::new());
    let mut bob_view = open(&backend, &post_id, bob, policy.clone(), &repo).await?;
    let mut alice_view = open(&backend, &post_id, alice, policy, &repo).await?;

    settle(&mut bob_view, "bob loads", |c| {
        !c.is_loading() && c.post().is_some()
    })
    .await?;
    settle(&mut alice_view, "alice loads", |c| {
        !c.is_loading() && c.post().is_some()
    })
    .await?;

    // Bob changes his mind on the vote; only the final choice sticks
    bob_view.vote(&answer, VoteKind::Up).await?;
    bob_view.vote(&answer, VoteKind::Down).await?;
    bob_view.vote(&answer, VoteKind::Up).await?;
    bob_view
        .react(&answer, &ReactionKind::from("thumbs_up"))
        .await?;
    bob_view.toggle_like().await?;
    bob_view.toggle_bookmark().await?;

    bob_view.select_file(LocalFile::new(
        "diagram.png",
        "image/png",
        vec![0x89, b'P', b'N', b'G', 0, 0, 0, 0],
    ))?;
    settle(&mut bob_view, "upload attaches", |c| {
        matches!(c.upload_state(), UploadState::Attached { .. })
    })
    .await?;

    let follow_up = bob_view
        .submit_reply(
            Some(&answer),
            "Thanks @carol, this is what I ended up with.",
            None,
        )
        .await?;

    alice_view.mark_solution(&answer, true)?;

    settle(&mut alice_view, "alice settles", |c| c.pending_count() == 0).await?;
    settle(&mut bob_view, "bob settles", |c| {
        c.pending_count() == 0
            && c.forest().contains(&follow_up)
            && c.post().is_some_and(|p| p.resolved())
    })
    .await?;

    let post = bob_view
        .post()
        .cloned()
        .ok_or_else(|| anyhow!("Post missing after simulation"))?;

    if args.json {
        let output = SimulationOutput {
            post,
            tree: bob_view.forest().entries(),
            ledger: bob_view.ledger().state().clone(),
        };
        let json =
            serde_json::to_string_pretty(&output).context("Failed to serialize simulation")?;
        println!("{}", json);
    } else {
        print!("{}", render::post_text(&post, Some(bob_view.ledger())));
        println!();
        print!(
            "{}",
            render::forest_text(bob_view.forest(), Some(bob_view.ledger()))
        );
    }

    alice_view.close().await;
    bob_view.close().await;
    tracing::info!(post_id = %post_id, "Simulation finished");

    Ok(())
}

async fn open(
    backend: &MemoryBackend,
    post_id: &PostId,
    viewer: Viewer,
    policy: ReplyPolicy,
    repo: &Arc<InMemoryInteractionRepo>,
) -> Result<Session> {
    let session = Arc::new(backend.session(viewer.clone()));
    let uploader = StubUploader::new().with_step_delay(Duration::from_millis(5));

    DiscussionController::open(
        post_id.clone(),
        viewer,
        Arc::clone(&session),
        session,
        Arc::new(uploader),
        Arc::clone(repo),
        policy,
    )
    .await
    .context("Failed to open discussion")
}

/// Apply events until `done` holds
async fn settle(
    controller: &mut Session,
    step: &str,
    done: impl Fn(&Session) -> bool,
) -> Result<()> {
    for _ in 0..MAX_EVENTS {
        if done(controller) {
            return Ok(());
        }

        let update = tokio::time::timeout(EVENT_TIMEOUT, controller.next_event())
            .await
            .with_context(|| format!("Timed out waiting for: {}", step))?;

        match update {
            Some(DiscussionUpdate::MutationRolledBack { key, error }) => {
                tracing::warn!(key = ?key, error = %error, "Mutation rolled back");
            }
            Some(DiscussionUpdate::UploadFailed(error)) => {
                bail!("Upload failed during '{}': {}", step, error);
            }
            Some(update) => {
                tracing::debug!(user_id = %controller.viewer().user_id, update = ?update, "Applied event");
            }
            None => bail!("Discussion closed while waiting for: {}", step),
        }
    }

    bail!("Gave up waiting for: {}", step)
}
