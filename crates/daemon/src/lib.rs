/// Jump service daemon library
///
/// HTTP route table, handlers and per-client rate limiting on top of the
/// core `JumpService`.

pub mod api;

pub use api::{router, AppState, ClientLimiter, HttpServer};
