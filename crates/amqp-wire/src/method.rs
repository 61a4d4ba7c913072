//! `decode_method`/`encode_method`/`decode_properties`/`encode_properties`
//! are, in the original design, opaque collaborators owned by whatever
//! AMQP method table the caller links against — this crate only moves
//! bytes, it has no idea what a `basic.publish` looks like. They are
//! modeled here as trait objects rather than generic parameters on
//! [`crate::Connection`] so that a connection engine's concrete type
//! doesn't have to name the method table it happens to be paired with.

use amqp_wire_util::WireResult;

use crate::pool::Pool;

/// Decodes and encodes the class-13 METHOD frame payload (method id +
/// argument list) once the frame header and footer have already been
/// validated by the connection engine.
pub trait MethodCodec: Send + Sync {
    /// `bytes` is the method's argument block, stripped of the 4-byte
    /// method id that precedes it on the wire. `pool` is the channel's
    /// arena, offered in case the decoded value needs to stash
    /// variable-length fields (tables, long strings) there instead of
    /// allocating on the heap independently.
    fn decode(
        &self,
        method_id: u32,
        pool: &mut Pool,
        bytes: &[u8],
    ) -> WireResult<Box<dyn std::any::Any + Send>>;

    /// Encodes `decoded` into `out`, returning the number of bytes
    /// written. `out` does not include the method id; the caller
    /// writes that separately.
    fn encode(
        &self,
        method_id: u32,
        decoded: &dyn std::any::Any,
        out: &mut [u8],
    ) -> WireResult<usize>;
}

/// Decodes and encodes the class-62 HEADER frame's content-properties
/// block (everything after `class_id`/`weight`/`body_size`).
pub trait PropertiesCodec: Send + Sync {
    fn decode(
        &self,
        class_id: u16,
        pool: &mut Pool,
        bytes: &[u8],
    ) -> WireResult<Box<dyn std::any::Any + Send>>;

    fn encode(
        &self,
        class_id: u16,
        decoded: &dyn std::any::Any,
        out: &mut [u8],
    ) -> WireResult<usize>;
}

/// A codec that treats both methods and properties as opaque byte
/// blobs. Used by the connection engine's own tests; not meant to
/// stand in for a real method table.
#[derive(Debug, Default)]
pub struct RawBytesCodec;

impl MethodCodec for RawBytesCodec {
    fn decode(
        &self,
        _method_id: u32,
        _pool: &mut Pool,
        bytes: &[u8],
    ) -> WireResult<Box<dyn std::any::Any + Send>> {
        Ok(Box::new(bytes.to_vec()))
    }

    fn encode(
        &self,
        _method_id: u32,
        decoded: &dyn std::any::Any,
        out: &mut [u8],
    ) -> WireResult<usize> {
        let bytes = decoded
            .downcast_ref::<Vec<u8>>()
            .ok_or(amqp_wire_util::WireError::InvalidParameter)?;
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }
}

impl PropertiesCodec for RawBytesCodec {
    fn decode(
        &self,
        _class_id: u16,
        _pool: &mut Pool,
        bytes: &[u8],
    ) -> WireResult<Box<dyn std::any::Any + Send>> {
        Ok(Box::new(bytes.to_vec()))
    }

    fn encode(
        &self,
        _class_id: u16,
        decoded: &dyn std::any::Any,
        out: &mut [u8],
    ) -> WireResult<usize> {
        let bytes = decoded
            .downcast_ref::<Vec<u8>>()
            .ok_or(amqp_wire_util::WireError::InvalidParameter)?;
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }
}
