//! Postgres-backed persistence and the background student sync worker.

use crate::models::{Lesson, Student};
use anyhow::Result;
use async_trait::async_trait;
use aula_core::repository::{LessonRecord, Repository, StudentRecord};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Repository for Db {
    async fn get_student(&self, student_id: &str) -> Result<Option<StudentRecord>> {
        let row = sqlx::query_as::<_, Student>(
            "SELECT id, email, name, created_at, current_lesson, profile
             FROM students WHERE id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StudentRecord::from))
    }

    async fn get_lesson(&self, lesson_id: &str) -> Result<Option<LessonRecord>> {
        let Ok(id) = lesson_id.parse::<Uuid>() else {
            warn!(lesson_id, "lesson reference is not a valid id");
            return Ok(None);
        };
        let row = sqlx::query_as::<_, Lesson>(
            "SELECT id, title, content, created_at FROM lessons WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(LessonRecord::from))
    }

    async fn upsert_student(&self, id: &str, email: &str, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO students (id, email, name)
             VALUES ($1, $2, $3)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(email)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// One student row to create or confirm after login.
#[derive(Debug, Clone)]
pub struct StudentSync {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// Spawns the worker that writes student rows off the login request path.
///
/// Login latency stays independent of the database; a failed write is
/// retried on the student's next login.
pub fn spawn_student_sync_worker(repo: Arc<dyn Repository>) -> mpsc::Sender<StudentSync> {
    let (tx, mut rx) = mpsc::channel::<StudentSync>(64);
    tokio::spawn(async move {
        while let Some(sync) = rx.recv().await {
            match repo.upsert_student(&sync.id, &sync.email, &sync.name).await {
                Ok(()) => info!(student_id = %sync.id, "student row synced"),
                Err(e) => {
                    error!(student_id = %sync.id, error = ?e, "student sync failed")
                }
            }
        }
        info!("student sync worker shutting down");
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingRepo {
        upserts: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Repository for RecordingRepo {
        async fn get_student(&self, _student_id: &str) -> Result<Option<StudentRecord>> {
            Ok(None)
        }

        async fn get_lesson(&self, _lesson_id: &str) -> Result<Option<LessonRecord>> {
            Ok(None)
        }

        async fn upsert_student(&self, id: &str, email: &str, name: &str) -> Result<()> {
            self.upserts.lock().unwrap().push((
                id.to_string(),
                email.to_string(),
                name.to_string(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn sync_worker_writes_queued_students() {
        let repo = Arc::new(RecordingRepo {
            upserts: Mutex::new(Vec::new()),
        });
        let tx = spawn_student_sync_worker(repo.clone());

        tx.send(StudentSync {
            id: "stu-1".to_string(),
            email: "ana@example.com".to_string(),
            name: "Ana".to_string(),
        })
        .await
        .expect("send should succeed");
        drop(tx);

        // The worker drains the channel before exiting on close.
        for _ in 0..100 {
            if !repo.upserts.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let upserts = repo.upserts.lock().unwrap();
        assert_eq!(
            upserts.as_slice(),
            &[(
                "stu-1".to_string(),
                "ana@example.com".to_string(),
                "Ana".to_string()
            )]
        );
    }
}
