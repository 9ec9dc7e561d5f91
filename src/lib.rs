pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::traits::{ChatBackend, QuestionStream};
pub use atoms::types::{ChatStatus, ChatTurn, LawReference, Rating, TurnChange, TurnUpdate};
pub use engine::auth::TokenStore;
pub use engine::backend::HttpBackend;
pub use engine::config::ClientConfig;
pub use engine::session::{AskOutcome, SessionController};
