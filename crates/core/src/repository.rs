//! Persistence capability consumed by the tool layer and the login flow.

use anyhow::Result;
use async_trait::async_trait;

/// A student row as seen by the domain layer.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    /// External subject id (the Google `sub` claim).
    pub id: String,
    pub email: String,
    pub name: String,
    /// Reference to the lesson the student is currently on, if any.
    pub current_lesson: Option<String>,
    pub profile: serde_json::Value,
}

/// A lesson row as seen by the domain layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonRecord {
    pub id: String,
    pub title: String,
    pub content: String,
}

/// Contract for student/lesson persistence.
///
/// The service crate provides a Postgres-backed implementation; tests use
/// in-memory stand-ins.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Looks up a student by external subject id.
    async fn get_student(&self, student_id: &str) -> Result<Option<StudentRecord>>;

    /// Looks up a lesson by its id. An unparseable id is reported as
    /// "not found", not as an error.
    async fn get_lesson(&self, lesson_id: &str) -> Result<Option<LessonRecord>>;

    /// Creates the student row on first login; a no-op if it already exists.
    async fn upsert_student(&self, id: &str, email: &str, name: &str) -> Result<()>;
}
