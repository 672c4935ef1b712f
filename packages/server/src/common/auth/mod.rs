//! Authorization for resource operations.
//!
//! Every resource definition declares an [`Access`] level per operation.
//! Handlers resolve the caller (if any) and ask the level whether it admits
//! them:
//!
//! ```rust,ignore
//! definition.permissions.write.check(auth.as_ref(), "write expenses")?;
//! ```

mod access;
mod errors;

pub use access::Access;
pub use errors::AuthError;
