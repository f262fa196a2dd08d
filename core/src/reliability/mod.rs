// Reliability — acknowledgment tracking, timeout retransmission, backoff
//
// Every outbound message gets a frame id. The coordinator sends all of its
// chunks, waits for an acknowledgment carrying that id, and re-sends the
// whole message with a growing timeout until it is acknowledged or the
// retry budget is spent.

pub mod backoff;
pub mod coordinator;

pub use backoff::ReliabilityConfig;
pub use coordinator::{DeliveryReport, FrameLink, ReliabilityCoordinator, SendState};
