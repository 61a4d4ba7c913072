//! The tagged union handed back by [`crate::Connection::handle_input`]
//! and accepted by [`crate::Connection::send_frame`].
//!
//! [`Frame`] borrows its variable-length payloads directly out of the
//! channel's arena (zero-copy); the borrow's lifetime is tied to the
//! `&mut Connection` that produced it, so the borrow checker enforces
//! that the frame is consumed before the connection's state can be
//! advanced again (the arena's contents stay put until then).

use crate::codec::{FRAME_TYPE_BODY, FRAME_TYPE_HEADER, FRAME_TYPE_HEARTBEAT, FRAME_TYPE_METHOD};

/// A fully decoded inbound frame, or `None` when a call to
/// `handle_input` consumed bytes without completing one.
pub enum Frame<'a> {
    None,
    ProtocolHeader {
        transport_high: u8,
        transport_low: u8,
        version_major: u8,
        version_minor: u8,
    },
    Method {
        channel: u16,
        id: u32,
        decoded: Box<dyn std::any::Any + Send>,
    },
    Header {
        channel: u16,
        class_id: u16,
        body_size: u64,
        raw: &'a [u8],
        decoded: Box<dyn std::any::Any + Send>,
    },
    Body {
        channel: u16,
        body_fragment: &'a [u8],
    },
    Heartbeat {
        channel: u16,
    },
}

/// What the caller supplies to [`crate::Connection::send_frame`]. Kept
/// distinct from [`Frame`] because an outbound method/header is
/// supplied by reference (the caller owns the decoded value), while an
/// inbound one is handed back by value as a freshly allocated `Box`.
pub enum OutboundFrame<'a> {
    Method {
        channel: u16,
        id: u32,
        decoded: &'a dyn std::any::Any,
    },
    Header {
        channel: u16,
        class_id: u16,
        body_size: u64,
        decoded: &'a dyn std::any::Any,
    },
    Body {
        channel: u16,
        body_fragment: &'a [u8],
    },
    Heartbeat {
        channel: u16,
    },
}

impl OutboundFrame<'_> {
    pub(crate) const fn channel(&self) -> u16 {
        match self {
            Self::Method { channel, .. }
            | Self::Header { channel, .. }
            | Self::Body { channel, .. }
            | Self::Heartbeat { channel } => *channel,
        }
    }

    pub(crate) const fn frame_type(&self) -> u8 {
        match self {
            Self::Method { .. } => FRAME_TYPE_METHOD,
            Self::Header { .. } => FRAME_TYPE_HEADER,
            Self::Body { .. } => FRAME_TYPE_BODY,
            Self::Heartbeat { .. } => FRAME_TYPE_HEARTBEAT,
        }
    }
}
