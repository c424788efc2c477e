//! Leadline Services Layer
//!
//! Business services over the allocation store: the operator selector
//! (`AppealRoutingService`) and the appeal state machine (`AppealService`).
//! Both operate inside a caller-owned unit of work; the commit boundary
//! always belongs to the caller.

pub mod appeal;
pub mod routing;

pub use appeal::AppealService;
pub use routing::AppealRoutingService;
