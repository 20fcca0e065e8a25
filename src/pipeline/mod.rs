//! Signing interceptor pipeline
//!
//! Wraps command execution: commands whose descriptor requires a signature
//! are signed before the handler runs, the signature is threaded into the
//! handler explicitly, and an audit event is published after the handler
//! returns whether it succeeded or not.

pub mod command;
pub mod interceptor;

pub use command::{CommandDescriptor, CommandError, CommandRequest, SignatureContext};
pub use interceptor::{InterceptError, SigningInterceptor, TRANSACTION_SECRET_HEADER};
