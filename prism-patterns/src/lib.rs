//! Pattern executables built on the prism pattern runtime
//!
//! Each pattern is a small binary linking [`prism::pattern`]: the runtime
//! dials the proxy and drives the lifecycle; the types here supply the
//! behavior between `Initialize` and `Stop`.

pub mod keyvalue;
pub mod mailbox;

pub use keyvalue::KeyValuePattern;
pub use mailbox::MailboxPattern;
