//! Tool registry for model-initiated function calls.
//!
//! The realtime model is advertised a static tool schema at session setup
//! and may later ask for one of those tools to be executed. Dispatch never
//! fails from the caller's point of view: unknown names and handler errors
//! both come back as structured `{"error": ...}` payloads so a bad tool
//! call can never take the relay down.

use crate::repository::Repository;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Maximum length of a lesson body returned through a tool, in characters.
/// Longer content is silently truncated to bound token cost.
pub const MAX_TOOL_CONTENT_LEN: usize = 1500;

/// Declarative description of one tool, advertised to the model at
/// session-configuration time.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// A named function the model may invoke during a session.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The schema advertised for this tool. Its `name` is also the
    /// dispatch key, so the advertised schema can never drift from the
    /// dispatcher.
    fn spec(&self) -> ToolSpec;

    /// Executes the tool for the given student. Errors are converted to
    /// structured payloads by the registry.
    async fn call(&self, args: Value, student_id: &str) -> Result<Value>;
}

/// Name-keyed table of tool handlers plus the dispatcher.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<&'static str, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(handler.spec().name, handler);
    }

    /// The full tool schema, in registration-independent (sorted) order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.handlers.values().map(|h| h.spec()).collect();
        specs.sort_by_key(|s| s.name);
        specs
    }

    /// Executes the named tool and returns its serialized result.
    ///
    /// An unknown tool name or a handler failure yields an `{"error": ...}`
    /// payload rather than an error, so callers never have to treat a bad
    /// tool call as fatal.
    pub async fn dispatch(&self, name: &str, args: Value, student_id: &str) -> Value {
        let Some(handler) = self.handlers.get(name) else {
            warn!(tool = name, "unknown tool requested by the model");
            return json!({ "error": "unknown tool" });
        };
        match handler.call(args, student_id).await {
            Ok(result) => {
                info!(tool = name, "tool executed");
                result
            }
            Err(e) => {
                error!(tool = name, error = ?e, "tool execution failed");
                json!({ "error": e.to_string() })
            }
        }
    }
}

/// Fetches the student's current lesson from the repository.
pub struct CurrentLessonTool {
    repo: Arc<dyn Repository>,
}

impl CurrentLessonTool {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl ToolHandler for CurrentLessonTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            kind: "function",
            name: "get_current_lesson",
            description: "Fetches the student's current lesson from the database.",
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    async fn call(&self, _args: Value, student_id: &str) -> Result<Value> {
        let Some(student) = self.repo.get_student(student_id).await? else {
            return Ok(json!({ "info": "Student not found." }));
        };

        let Some(lesson_ref) = student.current_lesson else {
            // No lesson chosen yet: hand the model a generic prompt.
            return Ok(json!({
                "topic": "Introduction",
                "content": "The student has not chosen a topic yet. Ask what they want to learn."
            }));
        };

        match self.repo.get_lesson(&lesson_ref).await? {
            Some(lesson) => {
                let content: String = if lesson.content.chars().count() > MAX_TOOL_CONTENT_LEN {
                    let truncated: String =
                        lesson.content.chars().take(MAX_TOOL_CONTENT_LEN).collect();
                    format!("{truncated}...")
                } else {
                    lesson.content
                };
                Ok(json!({ "title": lesson.title, "content": content }))
            }
            None => Ok(json!({ "info": "Lesson set but not found." })),
        }
    }
}
