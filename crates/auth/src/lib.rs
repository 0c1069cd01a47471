//! `cmms-auth`: pure authorization boundary for the inventory core.
//!
//! Authentication and tenant resolution happen upstream; this crate only decides
//! whether a resolved caller may perform an operation. It is decoupled from HTTP
//! and storage.

pub mod authorize;
pub mod context;
pub mod permissions;
pub mod roles;

pub use authorize::{
    authorize, ensure_tenant, explain_authorization, AuthorizationExplanation, AuthzError,
};
pub use context::RequestContext;
pub use permissions::Capability;
pub use roles::Role;
