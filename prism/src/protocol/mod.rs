//! The control-stream protocol
//!
//! One long-lived bidirectional TCP stream per peer carries length-delimited
//! JSON frames. Two frame families share the layer: pattern↔proxy
//! ([`frame::PatternToProxy`] / [`frame::ProxyToPattern`]) and
//! launcher-or-proxy↔admin ([`frame::NodeToAdmin`] / [`frame::AdminToNode`]).
//!
//! Commands flow one way and are tagged with a correlation id unique on the
//! stream; responses echo the id. [`correlation`] holds the pending-response
//! bookkeeping both the proxy and the admin gateway use.

pub mod codec;
pub mod correlation;
pub mod frame;

pub use codec::{ControlStream, FrameSink, FrameSource};
pub use correlation::{CorrelationCounter, CorrelationId, PendingResponses};
