//! Session orchestration for a Kiyomi practice call.
//!
//! [`CallController`] is the entry point. It composes the connection manager,
//! the RPC bridge to the practice agent, the analysis retry loop and the
//! presentation state machine.

pub mod analysis;
pub mod bridge;
pub mod connection;
pub mod controller;
pub mod error;
pub mod feed;
pub mod presentation;
pub mod timings;
pub mod token;

pub use analysis::{AnalysisRetryLoop, AnalysisSource, RetryOutcome, RetryPhase};
pub use bridge::{BridgeHandler, BridgeSubscription, RpcBridge};
pub use connection::{ConnectionManager, ConnectionState, RoomFactory, SessionHandle};
pub use controller::{CallController, SessionEvent, TranscriptLine, TranscriptSource};
pub use error::{AnalysisError, SessionError};
pub use feed::{TransientFeed, TransientItem};
pub use presentation::{Presentation, Screen, ScreenKind};
pub use timings::CallTimings;
pub use token::{HttpTokenIssuer, TokenIssuer};
