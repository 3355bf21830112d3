//! Row types for the students and lessons tables.

use aula_core::repository::{LessonRecord, StudentRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Student {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub current_lesson: Option<String>,
    pub profile: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lesson {
    pub id: Uuid,
    pub title: Option<String>,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Student> for StudentRecord {
    fn from(row: Student) -> Self {
        StudentRecord {
            id: row.id,
            email: row.email,
            name: row.name,
            current_lesson: row.current_lesson,
            profile: row.profile,
        }
    }
}

impl From<Lesson> for LessonRecord {
    fn from(row: Lesson) -> Self {
        LessonRecord {
            id: row.id.to_string(),
            title: row.title.unwrap_or_default(),
            content: row.content.unwrap_or_default(),
        }
    }
}
