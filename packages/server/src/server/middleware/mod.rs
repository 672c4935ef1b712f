// HTTP middleware
pub mod error_trace;
pub mod jwt_auth;
pub mod rate_limit;

pub use error_trace::*;
pub use jwt_auth::*;
pub use rate_limit::*;
