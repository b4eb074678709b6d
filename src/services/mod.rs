//! Business logic services layer

pub mod audit_service;
pub mod connection_service;
pub mod context_service;
pub mod dispatch_service;

pub use audit_service::AuditService;
pub use connection_service::ConnectionService;
pub use context_service::ContextCompiler;
pub use dispatch_service::CommandDispatcher;
