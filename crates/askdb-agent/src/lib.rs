//! askdb-agent: the question-answering agent loop
//!
//! Ties a model [`Transport`] to a read-only [`Database`] through a guarded
//! tool set, and checks executed queries with [`Grader`]s before answering.

pub mod agent;
pub mod db;
pub mod error;
pub mod events;
pub mod grader;
pub mod guard;
pub mod prompt;
pub mod state;
pub mod tool;
pub mod tools;
pub mod transport;

pub use agent::{Agent, AgentConfig, GradingConfig, RunOptions};
pub use db::{Database, DbError, SqliteDatabase};
pub use error::Error;
pub use events::{AgentEvent, Route};
pub use grader::{BoxedGrader, GradeVerdict, Grader, LlmGrader, default_graders};
pub use guard::SqlGuard;
pub use state::ConversationState;
pub use tool::{Tool, ToolResult};
pub use transport::{ProviderTransport, RetryConfig, Transport};
