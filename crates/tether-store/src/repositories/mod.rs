//! SQL data access layer.
//!
//! One stateless repository per table. All methods take a `&Connection` and
//! translate between Rust types and SQL; transaction boundaries live in the
//! [`Store`](crate::store::Store) facade.

pub mod audit;
pub mod chat;
pub mod file;
pub mod inbox;
pub mod job;
pub mod project;
pub mod run;
pub mod run_event;
pub mod session;

pub use audit::AuditRepo;
pub use chat::ChatRepo;
pub use file::FileRepo;
pub use inbox::InboxRepo;
pub use job::JobRepo;
pub use project::ProjectRepo;
pub use run::RunRepo;
pub use run_event::RunEventRepo;
pub use session::SessionRepo;
