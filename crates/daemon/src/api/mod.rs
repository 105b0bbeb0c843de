/// HTTP surface of the jump service
///
/// Serves the local and mirrored hosts files, trust reports, jump redirects
/// and accepts announces and registrations from other services.

pub mod handlers;
pub mod rate_limit;
pub mod responses;
pub mod server;

pub use handlers::AppState;
pub use rate_limit::ClientLimiter;
pub use responses::*;
pub use server::{router, HttpServer};
