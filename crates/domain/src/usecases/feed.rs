//! Live feed subscriber - forwards full snapshots onto the controller's queue

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::model::PostId;
use crate::ports::{DiscussionFeed, FeedError, SnapshotStream};
use crate::usecases::events::{DiscussionEvent, FeedStream};

/// Opens reply and post subscriptions for one discussion
pub struct LiveFeedSubscriber<F: DiscussionFeed + ?Sized + 'static> {
    feed: Arc<F>,
    events: UnboundedSender<DiscussionEvent>,
    next_id: u64,
}

impl<F: DiscussionFeed + ?Sized + 'static> LiveFeedSubscriber<F> {
    pub fn new(feed: Arc<F>, events: UnboundedSender<DiscussionEvent>) -> Self {
        Self {
            feed,
            events,
            next_id: 0,
        }
    }

    /// Subscribe to both streams of a post.
    ///
    /// Snapshots are posted as events tagged with the new subscription's id.
    pub async fn subscribe(&mut self, post_id: &PostId) -> Result<FeedSubscription, FeedError> {
        let replies = self.feed.subscribe_replies(post_id).await?;
        let post = self.feed.subscribe_post(post_id).await?;

        self.next_id += 1;
        let id = self.next_id;
        let active = Arc::new(AtomicBool::new(true));

        let tasks = vec![
            forward(
                replies,
                id,
                FeedStream::Replies,
                Arc::clone(&active),
                self.events.clone(),
                |subscription, snapshot| DiscussionEvent::Replies {
                    subscription,
                    snapshot,
                },
            ),
            forward(
                post,
                id,
                FeedStream::Post,
                Arc::clone(&active),
                self.events.clone(),
                |subscription, post| DiscussionEvent::Post { subscription, post },
            ),
        ];

        tracing::info!(post_id = %post_id, subscription = id, "Subscribed to discussion feed");

        Ok(FeedSubscription { id, active, tasks })
    }
}

fn forward<T: Send + 'static>(
    mut stream: SnapshotStream<T>,
    subscription: u64,
    kind: FeedStream,
    active: Arc<AtomicBool>,
    events: UnboundedSender<DiscussionEvent>,
    wrap: fn(u64, T) -> DiscussionEvent,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            if !active.load(Ordering::Acquire) {
                return;
            }
            if events.send(wrap(subscription, item)).is_err() {
                return;
            }
        }
        if active.load(Ordering::Acquire) {
            let _ = events.send(DiscussionEvent::FeedEnded {
                subscription,
                stream: kind,
            });
        }
    })
}

/// A standing subscription; torn down on `close` or drop
pub struct FeedSubscription {
    id: u64,
    active: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop forwarding; nothing from this subscription is sent afterwards
    pub fn close(&mut self) {
        if self.active.swap(false, Ordering::AcqRel) {
            tracing::info!(subscription = self.id, "Unsubscribed from discussion feed");
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
