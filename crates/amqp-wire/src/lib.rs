//! Core AMQP 0-9-1 wire engine: per-channel arena allocator, streaming
//! frame codec, and the connection state machine that ties them
//! together. Carries no notion of a byte transport or method table of
//! its own; both are supplied by the caller ([`amqp_wire_net`] for the
//! former, a [`method::MethodCodec`]/[`method::PropertiesCodec`] pair
//! for the latter).

mod codec;
mod connection;
mod frame;
mod method;
mod pool;

pub use connection::{
    Connection, ConnState, INITIAL_FRAME_MAX, INITIAL_INBOUND_SOCK_BUFFER_SIZE,
    PROPERTIES_POOL_PAGE_SIZE,
};
pub use frame::{Frame, OutboundFrame};
pub use method::{MethodCodec, PropertiesCodec, RawBytesCodec};
pub use pool::{Pool, PoolTable, CHANNEL_ARENA_PAGE_SIZE, POOL_TABLE_SIZE};

pub use amqp_wire_util::{WireError, WireResult};
