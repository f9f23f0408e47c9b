//! SMTP transport: sessions, commands and the listener

pub mod commands;
pub mod error;
pub mod response;
pub mod server;
pub mod session;

pub use error::{SmtpError, SmtpLimits};
pub use response::SmtpResponse;
pub use server::SmtpServer;
pub use session::{Session, SessionState};
