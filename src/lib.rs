pub mod auth;
pub mod bot;
mod chunker;
pub mod config;
pub mod dispatch;
pub mod pipeline;
pub mod report;
pub mod server;
pub mod sheet;
pub mod source;
pub mod telegram;
pub mod upload;
pub mod worker;

pub use config::{BotConfig, Endpoints, UploadDefaults};
pub use dispatch::Dispatcher;
pub use pipeline::{Job, JobOutcome, JobRunner};
pub use source::{ResolvedSource, SourceResolver};
pub use upload::{ChunkedUploader, CredentialProvider, RetryPolicy};
