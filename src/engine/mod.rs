// Sommaii Chat Engine — streaming chat client for the legal-advice backend.
// Everything with side effects lives here: HTTP, SSE, token persistence,
// cancellation and the session controller that ties them together.

pub mod auth;
pub mod backend;
pub mod cancel;
pub mod config;
pub mod http;
pub mod session;
pub mod sse;
pub mod transcript;
