use chrono::Utc;
use learnportal::backend::{InMemoryStore, RemoteStore};
use learnportal::core::config::RewardsConfig;
use learnportal::learn::badges::Badge;
use learnportal::learn::reconciler::{ModuleOutcome, QuizOutcome, Reconciler};
use learnportal::learn::types::{
    Course, Identity, Module, ModuleKind, NotificationType, ProgressRecord, QuizQuestion, Role,
};
use learnportal::learn::LearnError;
use learnportal::session::{SessionManager, SharedSession};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

fn learner(name: &str, email: &str) -> Identity {
    Identity {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: email.to_string(),
        role: Role::Learner,
        approved: true,
        points: 0,
        badges: BTreeSet::new(),
        profile_image_url: None,
    }
}

fn course(title: &str, passing_score: u8) -> Course {
    let id = Uuid::new_v4();
    Course {
        id,
        title: title.to_string(),
        description: format!("{title} for all staff"),
        category: "Compliance".to_string(),
        modules: vec![Module {
            id: format!("m-{}-1", id.simple()),
            title: "Overview".to_string(),
            kind: ModuleKind::Text,
            content: "Read carefully.".to_string(),
            video_source: None,
        }],
        quiz: vec![QuizQuestion {
            question: "Ready?".to_string(),
            options: vec!["no".to_string(), "yes".to_string()],
            correct_answer: 1,
        }],
        passing_score,
        image_url: None,
        reviews: Vec::new(),
        discussion: Vec::new(),
        textbook_url: None,
        textbook_name: None,
        created_at: Some(Utc::now()),
    }
}

struct Portal {
    store: InMemoryStore,
    me: Identity,
    sessions: SessionManager,
    session: SharedSession,
    rewards: RewardsConfig,
}

/// Seeds the learner and `courses`, then signs in through the session manager.
async fn sign_in(me: Identity, courses: &[Course]) -> Portal {
    let store = InMemoryStore::new();
    store.seed_user(me.clone(), "secret1").await;
    for c in courses {
        store.seed_course(c.clone()).await;
    }
    let sessions = SessionManager::new(Arc::new(store.clone()));
    let signed_in = sessions.sign_in(&me.email, "secret1").await.unwrap();
    let session = sessions.get(&signed_in.session_id).await.unwrap();
    Portal {
        store,
        me,
        sessions,
        session,
        rewards: RewardsConfig::default(),
    }
}

impl Portal {
    async fn enroll(&self, course_id: Uuid) {
        let mut session = self.session.lock().await;
        let store = Arc::clone(&session.store);
        Reconciler::new(store.as_ref(), &self.rewards)
            .enroll(&mut session.ctx, course_id)
            .await
            .unwrap();
    }

    /// Signs the same learner in again, as a second browser tab would.
    async fn another_tab(&self) -> SharedSession {
        let signed_in = self.sessions.sign_in(&self.me.email, "secret1").await.unwrap();
        self.sessions.get(&signed_in.session_id).await.unwrap()
    }

    async fn submit(&self, course_id: Uuid, score: i32) -> Result<QuizOutcome, LearnError> {
        self.submit_in(&self.session, course_id, score).await
    }

    async fn submit_in(
        &self,
        session: &SharedSession,
        course_id: Uuid,
        score: i32,
    ) -> Result<QuizOutcome, LearnError> {
        let mut session = session.lock().await;
        let store = Arc::clone(&session.store);
        Reconciler::new(store.as_ref(), &self.rewards)
            .submit_quiz(&mut session.ctx, course_id, score)
            .await
    }

    async fn remote(&self) -> Identity {
        self.store.user(self.me.id).await.unwrap()
    }

    async fn record(&self, course_id: Uuid) -> ProgressRecord {
        self.store.progress(self.me.id, course_id).await.unwrap()
    }
}

#[tokio::test]
async fn test_first_completion_awards_everything() {
    let aml = course("AML Basics", 70);
    let kyc = course("KYC", 70);
    let portal = sign_in(learner("Amina", "amina@corp.test"), &[aml.clone(), kyc]).await;
    portal.enroll(aml.id).await;

    let outcome = portal.submit(aml.id, 85).await.unwrap();
    let QuizOutcome::Passed {
        first_completion,
        points_awarded,
        badges,
        certificate,
        warnings,
        ..
    } = outcome
    else {
        panic!("expected a pass");
    };
    assert!(first_completion);
    assert!(warnings.is_empty());
    assert_eq!(badges, vec![Badge::FirstCourse]);
    assert_eq!(points_awarded, 100 + Badge::FirstCourse.points());
    assert_eq!(certificate.course_name, "AML Basics");
    assert_eq!(certificate.employee_name, "Amina");

    let remote = portal.remote().await;
    assert_eq!(remote.points, i64::from(points_awarded));
    assert!(remote.badges.contains(Badge::FirstCourse.id()));
    let record = portal.record(aml.id).await;
    assert_eq!(record.quiz_score, Some(85));
    assert!(record.completion_date.is_some());

    let kinds: Vec<NotificationType> = portal
        .store
        .notifications_for(portal.me.id)
        .await
        .iter()
        .map(|n| n.kind)
        .collect();
    assert_eq!(kinds, vec![NotificationType::Certificate, NotificationType::Badge]);

    let session = portal.session.lock().await;
    let mirrored = session.ctx.identity.as_ref().unwrap();
    assert_eq!(mirrored.points, remote.points);
    assert_eq!(mirrored.badges, remote.badges);
}

#[tokio::test]
async fn test_failing_score_is_recorded_without_rewards() {
    let aml = course("AML Basics", 70);
    let portal = sign_in(learner("Amina", "amina@corp.test"), &[aml.clone()]).await;
    portal.enroll(aml.id).await;

    let outcome = portal.submit(aml.id, 50).await.unwrap();
    assert_eq!(
        outcome,
        QuizOutcome::Failed {
            score: 50,
            passing_score: 70
        }
    );
    let record = portal.record(aml.id).await;
    assert_eq!(record.quiz_score, Some(50));
    assert!(record.completion_date.is_none());
    assert_eq!(portal.remote().await.points, 0);
    assert!(portal.store.notifications_for(portal.me.id).await.is_empty());
}

#[tokio::test]
async fn test_perfect_score_adds_quiz_master() {
    let aml = course("AML Basics", 70);
    let kyc = course("KYC", 70);
    let fraud = course("Fraud", 70);
    let mut me = learner("Amina", "amina@corp.test");
    me.badges.insert(Badge::FirstCourse.id().to_string());
    let portal = sign_in(me, &[aml.clone(), kyc.clone(), fraud]).await;

    let mut done = ProgressRecord::new(portal.me.id, aml.id);
    done.completion_date = Some(Utc::now());
    done.quiz_score = Some(80);
    portal.store.seed_progress(done.clone()).await;
    portal.session.lock().await.ctx.progress.insert(done);
    portal.enroll(kyc.id).await;

    let outcome = portal.submit(kyc.id, 100).await.unwrap();
    let QuizOutcome::Passed { badges, .. } = outcome else {
        panic!("expected a pass");
    };
    assert_eq!(badges, vec![Badge::QuizMaster]);

    let held = portal.remote().await.badges;
    assert!(held.contains(Badge::FirstCourse.id()));
    assert!(held.contains(Badge::QuizMaster.id()));
    assert_eq!(
        portal.remote().await.points,
        100 + i64::from(Badge::QuizMaster.points())
    );
}

#[tokio::test]
async fn test_retake_keeps_original_completion_date() {
    let aml = course("AML Basics", 70);
    let portal = sign_in(learner("Amina", "amina@corp.test"), &[aml.clone()]).await;
    portal.enroll(aml.id).await;

    portal.submit(aml.id, 75).await.unwrap();
    let first = portal.record(aml.id).await.completion_date;
    let points = portal.remote().await.points;

    let outcome = portal.submit(aml.id, 90).await.unwrap();
    let QuizOutcome::Passed {
        first_completion,
        points_awarded,
        badges,
        certificate,
        ..
    } = outcome
    else {
        panic!("expected a pass");
    };
    assert!(!first_completion);
    assert_eq!(points_awarded, 0);
    assert!(badges.is_empty());
    assert_eq!(Some(certificate.completion_date), first);

    let record = portal.record(aml.id).await;
    assert_eq!(record.quiz_score, Some(90));
    assert_eq!(record.completion_date, first);
    assert_eq!(portal.remote().await.points, points);
}

#[tokio::test]
async fn test_rating_before_completion_is_rejected() {
    let aml = course("AML Basics", 70);
    let portal = sign_in(learner("Amina", "amina@corp.test"), &[aml.clone()]).await;
    portal.enroll(aml.id).await;

    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let err = Reconciler::new(store.as_ref(), &portal.rewards)
        .rate_course(&mut session.ctx, aml.id, 5, "Great course")
        .await
        .unwrap_err();
    assert!(matches!(err, LearnError::Validation(_)));
    assert!(portal.store.reviews().await.is_empty());
}

#[tokio::test]
async fn test_module_completion_counts_once() {
    let aml = course("AML Basics", 70);
    let module = aml.modules[0].id.clone();
    let portal = sign_in(learner("Amina", "amina@corp.test"), &[aml.clone()]).await;
    portal.enroll(aml.id).await;

    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let reconciler = Reconciler::new(store.as_ref(), &portal.rewards);
    let first = reconciler
        .record_module_completion(&mut session.ctx, aml.id, &module)
        .await
        .unwrap();
    assert!(matches!(first, ModuleOutcome::Completed { points_awarded: 10, .. }));
    let second = reconciler
        .record_module_completion(&mut session.ctx, aml.id, &module)
        .await
        .unwrap();
    assert_eq!(second, ModuleOutcome::AlreadyCompleted);
    drop(session);

    assert_eq!(portal.record(aml.id).await.completed_modules, vec![module]);
    assert_eq!(portal.remote().await.points, 10);
}

#[tokio::test]
async fn test_all_badges_held_means_no_badge_rewards() {
    let aml = course("AML Basics", 70);
    let mut me = learner("Amina", "amina@corp.test");
    me.badges = Badge::ALL.iter().map(|b| b.id().to_string()).collect();
    let portal = sign_in(me, &[aml.clone()]).await;
    portal.enroll(aml.id).await;

    let outcome = portal.submit(aml.id, 100).await.unwrap();
    let QuizOutcome::Passed {
        badges,
        points_awarded,
        ..
    } = outcome
    else {
        panic!("expected a pass");
    };
    assert!(badges.is_empty());
    assert_eq!(points_awarded, 100);
    let kinds: Vec<NotificationType> = portal
        .store
        .notifications_for(portal.me.id)
        .await
        .iter()
        .map(|n| n.kind)
        .collect();
    assert_eq!(kinds, vec![NotificationType::Certificate]);
}

#[tokio::test]
async fn test_failed_score_write_leaves_no_trace() {
    let aml = course("AML Basics", 70);
    let portal = sign_in(learner("Amina", "amina@corp.test"), &[aml.clone()]).await;
    portal.enroll(aml.id).await;
    portal.store.fail_on("upsert_progress").await;

    let err = portal.submit(aml.id, 95).await.unwrap_err();
    assert!(matches!(err, LearnError::Remote(_)));

    portal.store.clear_failures().await;
    let record = portal.record(aml.id).await;
    assert_eq!(record.quiz_score, None);
    assert!(record.completion_date.is_none());
    assert_eq!(portal.remote().await.points, 0);

    let session = portal.session.lock().await;
    let mirrored = session.ctx.my_progress(aml.id).unwrap();
    assert_eq!(mirrored.quiz_score, None);
    assert_eq!(session.ctx.identity.as_ref().unwrap().points, 0);
}

#[tokio::test]
async fn test_notifications_read_through_store() {
    let portal = sign_in(learner("Amina", "amina@corp.test"), &[]).await;
    portal
        .store
        .create_notification(portal.me.id, NotificationType::Announcement, "Welcome")
        .await
        .unwrap();
    let rows = portal.store.list_notifications(portal.me.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].read);
}

#[tokio::test]
async fn test_completion_from_another_tab_is_not_repeated() {
    let aml = course("AML Basics", 70);
    let portal = sign_in(learner("Amina", "amina@corp.test"), &[aml.clone()]).await;
    portal.enroll(aml.id).await;
    let tab = portal.another_tab().await;

    let first = portal.submit(aml.id, 85).await.unwrap();
    assert!(matches!(first, QuizOutcome::Passed { first_completion: true, .. }));
    let completed_at = portal.record(aml.id).await.completion_date;
    let points = portal.remote().await.points;

    let outcome = portal.submit_in(&tab, aml.id, 85).await.unwrap();
    let QuizOutcome::Passed {
        first_completion,
        points_awarded,
        badges,
        certificate,
        ..
    } = outcome
    else {
        panic!("expected a pass");
    };
    assert!(!first_completion);
    assert_eq!(points_awarded, 0);
    assert!(badges.is_empty());
    assert_eq!(Some(certificate.completion_date), completed_at);

    assert_eq!(portal.record(aml.id).await.completion_date, completed_at);
    assert_eq!(portal.remote().await.points, points);
    let certificates = portal
        .store
        .notifications_for(portal.me.id)
        .await
        .iter()
        .filter(|n| n.kind == NotificationType::Certificate)
        .count();
    assert_eq!(certificates, 1);

    let session = tab.lock().await;
    assert_eq!(
        session.ctx.my_progress(aml.id).unwrap().completion_date,
        completed_at
    );
}

#[tokio::test]
async fn test_restore_leaves_a_single_live_session() {
    let portal = sign_in(learner("Amina", "amina@corp.test"), &[]).await;
    let first = portal
        .sessions
        .sign_in("amina@corp.test", "secret1")
        .await
        .unwrap();
    let second = portal.sessions.restore(&first.refresh_token).await.unwrap();
    let third = portal.sessions.restore(&second.refresh_token).await.unwrap();

    assert!(portal.sessions.get(&first.session_id).await.is_none());
    assert!(portal.sessions.get(&second.session_id).await.is_none());
    assert!(portal.sessions.get(&third.session_id).await.is_some());
    // the fixture's own sign-in plus the restored one
    assert_eq!(portal.sessions.len().await, 2);
}

#[tokio::test]
async fn test_expired_sessions_are_pruned() {
    let portal = sign_in(learner("Amina", "amina@corp.test"), &[]).await;
    portal.another_tab().await;
    assert_eq!(portal.sessions.len().await, 2);

    let later = Utc::now() + chrono::Duration::hours(2);
    assert_eq!(portal.sessions.prune_expired(later).await, 2);
    assert!(portal.sessions.is_empty().await);
    assert!(portal.session.lock().await.ctx.identity.is_none());
}
