//! Data models for the sync core
//!
//! Tenant collections, the upstream wire shapes they are built from, the sync
//! status record and the assignment events applied by the stream consumer.

mod assignment;
mod assignment_event;
mod credit;
mod organization;
mod reference;
mod role;
mod sync_status;
mod tenant;
mod user;
pub mod wrapper;

pub use assignment::*;
pub use assignment_event::*;
pub use credit::*;
pub use organization::*;
pub use reference::*;
pub use role::*;
pub use sync_status::*;
pub use tenant::*;
pub use user::*;
pub use wrapper::*;
