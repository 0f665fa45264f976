use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::family::FamilyId;

/// FLAP channels. Framing itself (start marker, sequence numbers, length) is the transport's
///  business, the control plane only needs to know which channel a payload belongs to.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum FlapChannel {
    SignOn = 1,
    Snac = 2,
    Error = 3,
    SignOff = 4,
    KeepAlive = 5,
}

/// SNAC header - all numbers in network byte order (BE):
/// ```ascii
/// 0: family (u16)
/// 2: subtype (u16)
/// 4: flags (u16)
/// 6: request id (u32)
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SnacHeader {
    pub family: FamilyId,
    pub subtype: u16,
    pub flags: u16,
    pub request_id: u32,
}

impl SnacHeader {
    pub const SERIALIZED_LEN: usize = 10;

    /// Set by servers when a length-prefixed block of (undocumented) extra data precedes the
    ///  actual payload
    pub const FLAG_EXTRA_BLOCK: u16 = 0x8000;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.family.0);
        buf.put_u16(self.subtype);
        buf.put_u16(self.flags);
        buf.put_u32(self.request_id);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<SnacHeader> {
        Ok(SnacHeader {
            family: FamilyId(buf.try_get_u16()?),
            subtype: buf.try_get_u16()?,
            flags: buf.try_get_u16()?,
            request_id: buf.try_get_u32()?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snac {
    pub header: SnacHeader,
    pub payload: Bytes,
}

impl Snac {
    pub fn new(family: FamilyId, subtype: u16, request_id: u32, payload: Bytes) -> Snac {
        Snac {
            header: SnacHeader {
                family,
                subtype,
                flags: 0,
                request_id,
            },
            payload,
        }
    }

    pub fn family(&self) -> FamilyId {
        self.header.family
    }

    pub fn subtype(&self) -> u16 {
        self.header.subtype
    }

    pub fn ser(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SnacHeader::SERIALIZED_LEN + self.payload.len());
        self.header.ser(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn try_deser(mut buf: Bytes) -> anyhow::Result<Snac> {
        let header = SnacHeader::try_deser(&mut buf)?;

        if header.flags & SnacHeader::FLAG_EXTRA_BLOCK != 0 {
            let len = buf.try_get_u16()? as usize;
            if buf.remaining() < len {
                bail!("SNAC extra block of {} bytes exceeds the remaining {} bytes", len, buf.remaining());
            }
            buf.advance(len);
        }

        Ok(Snac {
            header,
            payload: buf,
        })
    }
}

/// Per-session source of SNAC request ids
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicU32,
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIds {
    pub fn new() -> RequestIds {
        Self::starting_at(rand::random::<u32>() & 0x7fff_ffff)
    }

    pub fn starting_at(first: u32) -> RequestIds {
        RequestIds {
            next: AtomicU32::new(first),
        }
    }

    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn snac(&self, family: FamilyId, subtype: u16, payload: Bytes) -> Snac {
        Snac::new(family, subtype, self.next_id(), payload)
    }
}
