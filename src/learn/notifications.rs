//! Notification inbox, push feed and poller.
//!
//! Notifications are created remotely (the reconciler and admin actions go
//! through the `create_notification` RPC). The poller picks up rows newer than
//! each session's watermark, folds them into the session mirror and publishes
//! them on the [`NotificationFeed`], which the SSE endpoint streams out.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::types::Notification;
use super::LearnError;
use crate::backend::RemoteStore;
use crate::session::{SessionContext, SessionManager, SharedSession};

/// Marks every unread notification read. The mirror flips first; if the
/// remote update fails exactly those notifications flip back.
pub async fn mark_all_read(store: &dyn RemoteStore, ctx: &mut SessionContext) -> Result<usize, LearnError> {
    let unread: Vec<uuid::Uuid> = ctx
        .notifications
        .iter()
        .filter(|n| !n.read)
        .map(|n| n.id)
        .collect();
    if unread.is_empty() {
        return Ok(0);
    }

    for notification in ctx.notifications.iter_mut() {
        notification.read = true;
    }

    if let Err(e) = store.mark_notifications_read(&unread).await {
        error!("Could not mark notifications as read on the server: {}", e);
        for notification in ctx
            .notifications
            .iter_mut()
            .filter(|n| unread.contains(&n.id))
        {
            notification.read = false;
        }
        return Err(e.into());
    }
    Ok(unread.len())
}

#[derive(Clone)]
pub struct NotificationFeed {
    tx: broadcast::Sender<Notification>,
}

impl NotificationFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Number of subscribers that will see it; zero is not an error.
    pub fn publish(&self, notification: Notification) -> usize {
        self.tx.send(notification).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

/// Fetches rows at or after the session's watermark and applies the new ones.
pub async fn deliver_new(session: &SharedSession, feed: &NotificationFeed) -> Result<usize, LearnError> {
    let (store, user_id, since) = {
        let session = session.lock().await;
        if session.ctx.identity.is_none() {
            return Ok(0);
        }
        (
            Arc::clone(&session.store),
            session.user_id(),
            session.notification_watermark,
        )
    };

    let rows = store.notifications_since(user_id, since).await?;

    let mut session = session.lock().await;
    let mut delivered = 0;
    for notification in rows {
        if session
            .notification_watermark
            .map_or(true, |ts| notification.timestamp > ts)
        {
            session.notification_watermark = Some(notification.timestamp);
        }
        if session.ctx.apply_notification(notification.clone()) {
            feed.publish(notification);
            delivered += 1;
        }
    }
    if delivered > 0 {
        debug!("Delivered {} notifications to {}", delivered, user_id);
    }
    Ok(delivered)
}

pub struct NotificationPoller {
    sessions: Arc<SessionManager>,
    feed: NotificationFeed,
    interval: Duration,
}

impl NotificationPoller {
    pub fn new(sessions: Arc<SessionManager>, feed: NotificationFeed, interval: Duration) -> Self {
        Self {
            sessions,
            feed,
            interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        info!("Notification poller started, interval {:?}", self.interval);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.interval);
            loop {
                tick.tick().await;
                self.poll_once().await;
            }
        })
    }

    /// One pass over every live session. Expired sessions are dropped first;
    /// a failing session is logged and skipped.
    pub async fn poll_once(&self) -> usize {
        let pruned = self.sessions.prune_expired(Utc::now()).await;
        if pruned > 0 {
            info!("Dropped {} expired sessions", pruned);
        }
        let mut delivered = 0;
        for session in self.sessions.all().await {
            match deliver_new(&session, &self.feed).await {
                Ok(n) => delivered += n,
                Err(e) => warn!("Notification poll failed: {}", e),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryStore;
    use crate::core::shared::test_utils::learner;
    use crate::learn::types::NotificationType;

    #[tokio::test]
    async fn test_mark_all_read_reverts_on_failure() {
        let store = InMemoryStore::new();
        let me = learner("Amina", "a@corp.test");
        store
            .create_notification(me.id, NotificationType::Reminder, "one")
            .await
            .unwrap();
        let mut ctx = SessionContext::for_identity(me.clone());
        ctx.notifications = store.list_notifications(me.id).await.unwrap();
        let mut already_read = ctx.notifications[0].clone();
        already_read.id = uuid::Uuid::new_v4();
        already_read.read = true;
        ctx.notifications.push(already_read);

        store.fail_on("mark_notifications_read").await;
        assert!(mark_all_read(&store, &mut ctx).await.is_err());
        assert_eq!(ctx.unread_count(), 1);
        assert!(ctx.notifications[1].read);

        store.clear_failures().await;
        assert_eq!(mark_all_read(&store, &mut ctx).await.unwrap(), 1);
        assert_eq!(ctx.unread_count(), 0);
        assert!(store.notifications_for(me.id).await[0].read);
        assert_eq!(mark_all_read(&store, &mut ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_feed_without_subscribers() {
        let feed = NotificationFeed::new(4);
        let notification = Notification {
            id: uuid::Uuid::new_v4(),
            user_id: uuid::Uuid::new_v4(),
            kind: NotificationType::Announcement,
            message: "hello".into(),
            read: false,
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(feed.publish(notification.clone()), 0);

        let mut rx = feed.subscribe();
        assert_eq!(feed.publish(notification.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), notification);
    }

    #[tokio::test]
    async fn test_poller_delivers_each_notification_once() {
        let store = InMemoryStore::new();
        let me = learner("Amina", "a@corp.test");
        store.seed_user(me.clone(), "secret1").await;
        let sessions = Arc::new(SessionManager::new(Arc::new(store.clone())));
        sessions.sign_in("a@corp.test", "secret1").await.unwrap();

        let feed = NotificationFeed::new(8);
        let mut rx = feed.subscribe();
        let poller = NotificationPoller::new(Arc::clone(&sessions), feed, Duration::from_secs(60));

        store
            .create_notification(me.id, NotificationType::Announcement, "Town hall at 3")
            .await
            .unwrap();
        assert_eq!(poller.poll_once().await, 1);
        assert_eq!(poller.poll_once().await, 0);

        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed.message, "Town hall at 3");

        let session = sessions.all().await.pop().unwrap();
        let session = session.lock().await;
        assert_eq!(session.ctx.notifications.len(), 1);
        assert_eq!(session.notification_watermark, Some(pushed.timestamp));
    }

    #[tokio::test]
    async fn test_poller_drops_expired_sessions() {
        let store = InMemoryStore::new();
        let me = learner("Amina", "a@corp.test");
        store.seed_user(me.clone(), "secret1").await;
        store.set_token_lifetime(1).await;
        let sessions = Arc::new(SessionManager::new(Arc::new(store.clone())));
        sessions.sign_in("a@corp.test", "secret1").await.unwrap();
        store
            .create_notification(me.id, NotificationType::Announcement, "Town hall at 3")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let poller = NotificationPoller::new(Arc::clone(&sessions), NotificationFeed::new(8), Duration::from_secs(60));
        assert_eq!(poller.poll_once().await, 0);
        assert!(sessions.is_empty().await);
        assert!(!store.calls().await.contains(&"notifications_since".to_string()));
    }
}
