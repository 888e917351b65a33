//! Runs against a real Postgres when `TEST_DATABASE_URL` is set; otherwise
//! every test returns early.

use anyhow::Result;
use chrono::{Duration, Utc};
use opsportal::access::Role;
use opsportal::db;
use opsportal::models::{NewUser, Project, ProjectStatus, Session};
use opsportal::store::{PgStore, Store, StoreError};
use uuid::Uuid;

async fn pg_store() -> Result<Option<PgStore>> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return Ok(None);
    };
    let pool = tokio::task::spawn_blocking(move || -> Result<_> {
        let pool = db::init_pool(&url)?;
        db::run_migrations(&pool)?;
        Ok(pool)
    })
    .await??;
    Ok(Some(PgStore::new(pool)))
}

fn new_user(role: Role) -> NewUser {
    NewUser {
        email: format!("{}@example.com", Uuid::new_v4()),
        password_hash: "$argon2id$placeholder".to_string(),
        first_name: "Pat".to_string(),
        last_name: "Gres".to_string(),
        role,
    }
}

#[tokio::test]
async fn users_and_sessions_roundtrip() -> Result<()> {
    let Some(store) = pg_store().await? else {
        return Ok(());
    };

    let draft = new_user(Role::Employee);
    let user = store.insert_user(draft.clone()).await?;
    let found = store.find_user_by_email(&draft.email).await?;
    assert_eq!(found.map(|found| found.id), Some(user.id));
    assert!(matches!(
        store.insert_user(draft).await,
        Err(StoreError::Conflict(_))
    ));

    let now = Utc::now();
    let session_id = format!("{:x}", Uuid::new_v4().as_u128());
    store
        .insert_session(Session {
            id: session_id.clone(),
            user_id: user.id,
            created_at: now,
            expires_at: now + Duration::hours(1),
        })
        .await?;
    assert!(store.find_session(&session_id).await?.is_some());
    assert!(store.delete_session(&session_id).await?);
    assert!(!store.delete_session(&session_id).await?);
    Ok(())
}

#[tokio::test]
async fn project_edits_report_before_and_after() -> Result<()> {
    let Some(store) = pg_store().await? else {
        return Ok(());
    };

    let owner = store.insert_user(new_user(Role::Admin)).await?;
    let now = Utc::now();
    let project = Project {
        id: Uuid::new_v4(),
        name: "Harbor".to_string(),
        description: None,
        address: None,
        status: ProjectStatus::Planning,
        on_hold_reason: None,
        expected_resume_date: None,
        created_by: owner.id,
        created_at: now,
        updated_at: now,
    };
    store.insert_project(project.clone()).await?;

    let modified = store
        .modify_project(
            project.id,
            Box::new(|project: &mut Project| project.status = ProjectStatus::Active),
        )
        .await?
        .expect("project exists");
    assert_eq!(modified.before.status, ProjectStatus::Planning);
    assert_eq!(modified.after.status, ProjectStatus::Active);

    let first = store.next_work_order_sequence().await?;
    let second = store.next_work_order_sequence().await?;
    assert!(second > first);

    assert!(store.delete_project(project.id).await?);
    assert!(store.find_project(project.id).await?.is_none());
    Ok(())
}
