//! Progress and gamification reconciler.
//!
//! Every operation writes to the remote store first and only then touches the
//! session mirror, so the mirror always shows what was confirmed. Secondary
//! writes that follow a committed primary write (points, notifications, badge
//! persistence) never undo the primary; their failures come back as
//! [`SyncWarning`]s.

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use uuid::Uuid;

use super::badges::{self, Badge, BadgeSnapshot};
use super::types::{
    CertificateData, NewReview, NotificationType, ProgressPatch, ProgressRecord, Review,
};
use super::LearnError;
use crate::backend::RemoteStore;
use crate::core::config::RewardsConfig;
use crate::session::SessionContext;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncWarning {
    pub operation: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModuleOutcome {
    AlreadyCompleted,
    Completed {
        completed_modules: Vec<String>,
        points_awarded: u32,
        warnings: Vec<SyncWarning>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuizOutcome {
    Failed {
        score: u8,
        passing_score: u8,
    },
    Passed {
        score: u8,
        first_completion: bool,
        points_awarded: u32,
        badges: Vec<Badge>,
        certificate: CertificateData,
        warnings: Vec<SyncWarning>,
    },
}

impl QuizOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, QuizOutcome::Passed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingOutcome {
    pub review: Review,
    pub progress_rating_saved: bool,
}

/// Percentage of correctly answered questions, rounded to the nearest integer.
pub fn grade_quiz(course: &super::types::Course, answers: &[usize]) -> Result<u8, LearnError> {
    if course.quiz.is_empty() {
        return Ok(0);
    }
    if answers.len() != course.quiz.len() {
        return Err(LearnError::validation(format!(
            "Expected {} answers, got {}",
            course.quiz.len(),
            answers.len()
        )));
    }
    let correct = course
        .quiz
        .iter()
        .zip(answers)
        .filter(|(q, a)| q.correct_answer == **a)
        .count();
    let pct = (correct as f64 * 100.0 / course.quiz.len() as f64).round();
    Ok(pct as u8)
}

pub struct Reconciler<'a> {
    store: &'a dyn RemoteStore,
    rewards: &'a RewardsConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn RemoteStore, rewards: &'a RewardsConfig) -> Self {
        Self { store, rewards }
    }

    async fn write_progress(
        &self,
        ctx: &mut SessionContext,
        patch: ProgressPatch,
        operation: &str,
    ) -> Result<ProgressRecord, LearnError> {
        let confirmed = match self.store.upsert_progress(&patch).await {
            Ok(record) => record,
            Err(e) => {
                error!(
                    "{} failed for user {} course {}: {}",
                    operation, patch.user_id, patch.course_id, e
                );
                return Err(e.into());
            }
        };
        // The stored row wins over the mirror; another session may have moved it.
        ctx.progress.insert(confirmed.clone());
        Ok(confirmed)
    }

    pub async fn enroll(&self, ctx: &mut SessionContext, course_id: Uuid) -> Result<ProgressRecord, LearnError> {
        let user_id = ctx.user_id()?;
        let title = ctx.course(course_id)?.title.clone();
        let patch = ProgressPatch::new(user_id, course_id).last_viewed(Utc::now());
        let record = self.write_progress(ctx, patch, "enroll").await?;
        info!("User {} enrolled in \"{}\"", user_id, title);
        Ok(record)
    }

    /// Refreshes the last-viewed stamp when the identity is enrolled. Returns
    /// whether it was.
    pub async fn open_course(&self, ctx: &mut SessionContext, course_id: Uuid) -> Result<bool, LearnError> {
        let user_id = ctx.user_id()?;
        ctx.course(course_id)?;
        if ctx.progress.get(user_id, course_id).is_none() {
            return Ok(false);
        }
        let patch = ProgressPatch::new(user_id, course_id).last_viewed(Utc::now());
        self.write_progress(ctx, patch, "open_course").await?;
        Ok(true)
    }

    pub async fn award_points(
        &self,
        ctx: &mut SessionContext,
        user_id: Uuid,
        amount: u32,
    ) -> Result<(), LearnError> {
        if amount == 0 {
            return Ok(());
        }
        if let Err(e) = self.store.increment_points(user_id, i64::from(amount)).await {
            error!("Awarding {} points to {} failed: {}", amount, user_id, e);
            return Err(e.into());
        }
        ctx.apply_points(user_id, i64::from(amount));
        Ok(())
    }

    async fn award_or_warn(
        &self,
        ctx: &mut SessionContext,
        user_id: Uuid,
        amount: u32,
        warnings: &mut Vec<SyncWarning>,
    ) -> u32 {
        match self.award_points(ctx, user_id, amount).await {
            Ok(()) => amount,
            Err(e) => {
                warnings.push(SyncWarning {
                    operation: "award_points",
                    message: e.to_string(),
                });
                0
            }
        }
    }

    async fn notify_or_warn(
        &self,
        user_id: Uuid,
        kind: NotificationType,
        message: &str,
        warnings: &mut Vec<SyncWarning>,
    ) {
        if let Err(e) = self.store.create_notification(user_id, kind, message).await {
            warn!("Creating {} notification for {} failed: {}", kind.as_str(), user_id, e);
            warnings.push(SyncWarning {
                operation: "create_notification",
                message: e.to_string(),
            });
        }
    }

    pub async fn record_module_completion(
        &self,
        ctx: &mut SessionContext,
        course_id: Uuid,
        module_id: &str,
    ) -> Result<ModuleOutcome, LearnError> {
        let user_id = ctx.user_id()?;
        if ctx.course(course_id)?.module(module_id).is_none() {
            return Err(LearnError::validation(format!(
                "Module {module_id} is not part of course {course_id}"
            )));
        }
        let record = ctx
            .progress
            .get(user_id, course_id)
            .ok_or(LearnError::NotEnrolled(course_id))?;
        if record.has_completed_module(module_id) {
            return Ok(ModuleOutcome::AlreadyCompleted);
        }

        let mut modules = record.completed_modules.clone();
        modules.push(module_id.to_string());
        let patch = ProgressPatch::new(user_id, course_id).completed_modules(modules);
        let record = self.write_progress(ctx, patch, "record_module_completion").await?;

        let mut warnings = Vec::new();
        let points_awarded = self
            .award_or_warn(ctx, user_id, self.rewards.module_points, &mut warnings)
            .await;

        Ok(ModuleOutcome::Completed {
            completed_modules: record.completed_modules,
            points_awarded,
            warnings,
        })
    }

    pub async fn submit_quiz(
        &self,
        ctx: &mut SessionContext,
        course_id: Uuid,
        score: i32,
    ) -> Result<QuizOutcome, LearnError> {
        let score = u8::try_from(score)
            .ok()
            .filter(|s| *s <= 100)
            .ok_or_else(|| LearnError::validation("Score must be between 0 and 100"))?;
        let identity = ctx.identity()?.clone();
        let course = ctx.course(course_id)?.clone();

        let patch = ProgressPatch::new(identity.id, course_id).quiz_score(score);
        let record = self.write_progress(ctx, patch, "save_quiz_score").await?;

        if !course.passes(score) {
            info!(
                "User {} scored {} on \"{}\" (pass mark {})",
                identity.id, score, course.title, course.passing_score
            );
            return Ok(QuizOutcome::Failed {
                score,
                passing_score: course.passing_score,
            });
        }

        let mut warnings = Vec::new();
        let mut points_awarded = 0;
        let mut awarded_badges = Vec::new();
        let first_completion = !record.is_completed();

        if first_completion {
            let patch = ProgressPatch::new(identity.id, course_id).completion_date(Utc::now());
            self.write_progress(ctx, patch, "save_completion_date").await?;
            info!("User {} completed \"{}\" with {}", identity.id, course.title, score);

            points_awarded += self
                .award_or_warn(ctx, identity.id, self.rewards.completion_points, &mut warnings)
                .await;
            self.notify_or_warn(
                identity.id,
                NotificationType::Certificate,
                &format!(
                    "Congratulations! You earned a certificate for \"{}\".",
                    course.title
                ),
                &mut warnings,
            )
            .await;

            let snapshot = BadgeSnapshot {
                completed_courses: ctx.progress.completed_count(identity.id),
                total_courses: ctx.courses.len(),
                score,
            };
            let held = ctx.identity()?.badges.clone();
            let award = badges::evaluate(&snapshot, &held);

            if !award.is_empty() {
                let merged = award.merged_with(&held);
                match self.store.replace_badges(identity.id, &merged).await {
                    Ok(()) => {
                        ctx.apply_badges(identity.id, &merged);
                        for badge in &award.badges {
                            self.notify_or_warn(
                                identity.id,
                                NotificationType::Badge,
                                &badge.notification_message(),
                                &mut warnings,
                            )
                            .await;
                        }
                        points_awarded += self
                            .award_or_warn(ctx, identity.id, award.points, &mut warnings)
                            .await;
                        info!("User {} unlocked {:?}", identity.id, award.badges);
                        awarded_badges = award.badges;
                    }
                    Err(e) => {
                        warn!("Saving badges for {} failed: {}", identity.id, e);
                        warnings.push(SyncWarning {
                            operation: "replace_badges",
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        let completion_date = ctx
            .progress
            .get(identity.id, course_id)
            .and_then(|p| p.completion_date)
            .ok_or_else(|| LearnError::Internal("completion date missing after pass".into()))?;

        Ok(QuizOutcome::Passed {
            score,
            first_completion,
            points_awarded,
            badges: awarded_badges,
            certificate: CertificateData {
                course_id,
                employee_name: identity.name.clone(),
                course_name: course.title.clone(),
                completion_date,
            },
            warnings,
        })
    }

    pub async fn rate_course(
        &self,
        ctx: &mut SessionContext,
        course_id: Uuid,
        rating: i32,
        comment: &str,
    ) -> Result<RatingOutcome, LearnError> {
        let rating = u8::try_from(rating)
            .ok()
            .filter(|r| (1..=5).contains(r))
            .ok_or_else(|| LearnError::validation("Rating must be between 1 and 5"))?;
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(LearnError::validation("Please leave a comment with your rating"));
        }
        let identity = ctx.identity()?.clone();
        ctx.course(course_id)?;
        if !ctx
            .progress
            .get(identity.id, course_id)
            .is_some_and(|p| p.is_completed())
        {
            return Err(LearnError::validation(
                "Only learners who completed the course can rate it",
            ));
        }

        let review = self
            .store
            .insert_review(&NewReview {
                course_id,
                author_id: identity.id,
                author_name: identity.name.clone(),
                rating,
                comment: comment.to_string(),
            })
            .await
            .map_err(|e| {
                error!("Saving review for course {} failed: {}", course_id, e);
                LearnError::from(e)
            })?;

        let patch = ProgressPatch::new(identity.id, course_id).rating(rating);
        let progress_rating_saved = match self.store.upsert_progress(&patch).await {
            Ok(confirmed) => {
                ctx.progress.insert(confirmed);
                true
            }
            Err(e) => {
                warn!(
                    "Review {} saved but rating on progress for {}/{} failed: {}",
                    review.id, identity.id, course_id, e
                );
                false
            }
        };

        ctx.course_mut(course_id)?.reviews.push(review.clone());
        Ok(RatingOutcome {
            review,
            progress_rating_saved,
        })
    }
}
