//! Realtime room plumbing: participants, remote procedure calls between them,
//! and the room events a practice session reacts to.

pub mod devices;
pub mod error;
pub mod loopback;
pub mod protocol;
pub mod room;
pub mod ws;

pub use devices::{AudioInput, SilentInput};
pub use error::{RealtimeError, RpcError};
pub use loopback::{LoopbackHub, LoopbackRoom};
pub use room::{
    DEFAULT_RESPONSE_TIMEOUT, PerformRpcParams, RealtimeRoom, RoomEvent, RpcFuture, RpcHandler,
    RpcInvocation, RpcRegistry, rpc_handler,
};
pub use ws::WsRoom;
