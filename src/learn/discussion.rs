use chrono::Utc;
use log::{error, info};
use uuid::Uuid;

use super::types::DiscussionPost;
use super::LearnError;
use crate::backend::RemoteStore;
use crate::session::SessionContext;

fn new_post(ctx: &SessionContext, text: &str) -> Result<DiscussionPost, LearnError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(LearnError::validation("Post text cannot be empty"));
    }
    let me = ctx.identity()?;
    Ok(DiscussionPost {
        id: format!("d-{}", Uuid::new_v4().simple()),
        author_id: me.id,
        author_name: me.name.clone(),
        timestamp: Utc::now(),
        text: text.to_string(),
        replies: Vec::new(),
    })
}

fn attach_reply(posts: &mut [DiscussionPost], parent_id: &str, reply: &DiscussionPost) -> bool {
    for post in posts.iter_mut() {
        if post.id == parent_id {
            post.replies.push(reply.clone());
            return true;
        }
        if attach_reply(&mut post.replies, parent_id, reply) {
            return true;
        }
    }
    false
}

/// Shows `update` immediately, then writes the whole thread. A failed write
/// puts the previous thread back.
async fn commit(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    course_id: Uuid,
    update: impl FnOnce(&mut Vec<DiscussionPost>) -> Result<(), LearnError>,
) -> Result<(), LearnError> {
    let course = ctx.course_mut(course_id)?;
    let previous = course.discussion.clone();
    update(&mut course.discussion)?;
    let thread = course.discussion.clone();

    if let Err(e) = store.update_discussion(course_id, &thread).await {
        error!("Saving discussion for course {} failed: {}", course_id, e);
        ctx.course_mut(course_id)?.discussion = previous;
        return Err(e.into());
    }
    Ok(())
}

pub async fn post(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    course_id: Uuid,
    text: &str,
) -> Result<DiscussionPost, LearnError> {
    let post = new_post(ctx, text)?;
    let top = post.clone();
    commit(store, ctx, course_id, move |posts| {
        posts.insert(0, top);
        Ok(())
    })
    .await?;
    info!("New discussion post {} on course {}", post.id, course_id);
    Ok(post)
}

pub async fn reply(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    course_id: Uuid,
    parent_id: &str,
    text: &str,
) -> Result<DiscussionPost, LearnError> {
    let reply = new_post(ctx, text)?;
    let nested = reply.clone();
    commit(store, ctx, course_id, |posts| {
        if attach_reply(posts, parent_id, &nested) {
            Ok(())
        } else {
            Err(LearnError::NotFound(format!("post {parent_id}")))
        }
    })
    .await?;
    Ok(reply)
}
