pub mod ai;
pub mod assembler;
pub mod cache;
pub mod config;
pub mod error;
pub mod session;
pub mod state;
pub mod store;
pub mod transcript;

// Re-export main types for convenience
pub use ai::{ChatCompletionsClient, CompletionError, CompletionErrorKind, CompletionSource, FragmentStream};
pub use assembler::{Assembler, Turn, TurnOutcome, CURSOR};
pub use cache::ConversationCache;
pub use config::{Config, StoreBackend};
pub use error::{ChatError, ChatResult, PersistenceError, ValidationError};
pub use session::{ImportReport, Session, SessionSettings};
pub use state::{Message, Role};
pub use store::{MemoryRecordStore, RecordStore, RestRecordStore, SqliteRecordStore};
pub use transcript::LineIssue;
