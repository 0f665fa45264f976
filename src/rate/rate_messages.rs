use anyhow::anyhow;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::TryFromPrimitive;
use tracing::warn;

use crate::family::FamilyId;
use crate::rate::rate_class::{RateClassId, RateClassParams};

/// Rate parameters response (oservice 0x0007) - all numbers in network byte order (BE):
///
/// ```ascii
/// 0: number of classes (u16)
/// *: (repeated) class parameters
///    0: class id (u16)
///    2: window size (u32)
///    6: clear level (u32)
///   10: alert level (u32)
///   14: limit level (u32)
///   18: disconnect level (u32)
///   22: current level (u32)
///   26: max level (u32)
///   30: last time (u32)     - only for oservice version >= 3
///   34: current state (u8)  - only for oservice version >= 3
/// *: (repeated, once per class) class members
///    0: class id (u16)
///    2: number of members (u16)
///    *: (repeated) family (u16), subtype (u16)
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RateParameters {
    pub classes: Vec<RateClassParams>,
    pub members: Vec<(RateClassId, Vec<(FamilyId, u16)>)>,
}

impl RateParameters {
    pub fn try_deser(buf: &mut impl Buf, extended: bool) -> anyhow::Result<RateParameters> {
        let num_classes = buf.try_get_u16()?;

        let mut classes = Vec::with_capacity(num_classes as usize);
        for _ in 0..num_classes {
            classes.push(RateClassParams::try_deser(buf, extended)?);
        }

        let mut members = Vec::with_capacity(num_classes as usize);
        for _ in 0..num_classes {
            if !buf.has_remaining() {
                warn!("rate parameters contain member lists for only {} of {} classes", members.len(), num_classes);
                break;
            }

            let id = RateClassId(buf.try_get_u16()?);
            let num_members = buf.try_get_u16()?;
            let mut pairs = Vec::with_capacity(num_members as usize);
            for _ in 0..num_members {
                pairs.push((FamilyId(buf.try_get_u16()?), buf.try_get_u16()?));
            }
            members.push((id, pairs));
        }

        Ok(RateParameters { classes, members })
    }

    pub fn ser(&self, buf: &mut impl BufMut, extended: bool) {
        buf.put_u16(self.classes.len() as u16);
        for class in &self.classes {
            class.ser(buf, extended);
        }
        for (id, pairs) in &self.members {
            buf.put_u16(id.0);
            buf.put_u16(pairs.len() as u16);
            for (family, subtype) in pairs {
                buf.put_u16(family.0);
                buf.put_u16(*subtype);
            }
        }
    }

    /// class ids in the order the server sent them
    pub fn class_ids(&self) -> Vec<RateClassId> {
        self.classes.iter()
            .map(|c| c.id)
            .collect()
    }
}

impl RateClassParams {
    pub fn try_deser(buf: &mut impl Buf, extended: bool) -> anyhow::Result<RateClassParams> {
        let id = RateClassId(buf.try_get_u16()?);
        let window_size = buf.try_get_u32()?;
        let clear_level = buf.try_get_u32()?;
        let alert_level = buf.try_get_u32()?;
        let limit_level = buf.try_get_u32()?;
        let disconnect_level = buf.try_get_u32()?;
        let current_level = buf.try_get_u32()?;
        let max_level = buf.try_get_u32()?;

        let (last_time, current_state) = if extended {
            (Some(buf.try_get_u32()?), Some(buf.try_get_u8()?))
        }
        else {
            (None, None)
        };

        Ok(RateClassParams {
            id,
            window_size,
            clear_level,
            alert_level,
            limit_level,
            disconnect_level,
            current_level,
            max_level,
            last_time,
            current_state,
        })
    }

    pub fn ser(&self, buf: &mut impl BufMut, extended: bool) {
        buf.put_u16(self.id.0);
        buf.put_u32(self.window_size);
        buf.put_u32(self.clear_level);
        buf.put_u32(self.alert_level);
        buf.put_u32(self.limit_level);
        buf.put_u32(self.disconnect_level);
        buf.put_u32(self.current_level);
        buf.put_u32(self.max_level);
        if extended {
            buf.put_u32(self.last_time.unwrap_or(0));
            buf.put_u8(self.current_state.unwrap_or(0));
        }
    }
}

/// Rate acknowledgement (oservice 0x0008): the class ids, in the order they were received
pub fn ack_payload(ids: &[RateClassId]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 * ids.len());
    for id in ids {
        buf.put_u16(id.0);
    }
    buf.freeze()
}

#[repr(u16)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
pub enum RateChangeCode {
    Changed = 1,
    Warning = 2,
    Limited = 3,
    Cleared = 4,
}

/// Rate change notification (oservice 0x000A): code (u16) followed by one class parameter block
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RateChange {
    pub code: RateChangeCode,
    pub params: RateClassParams,
}

impl RateChange {
    pub fn try_deser(buf: &mut impl Buf, extended: bool) -> anyhow::Result<RateChange> {
        let raw_code = buf.try_get_u16()?;
        let code = RateChangeCode::try_from(raw_code)
            .map_err(|_| anyhow!("invalid rate change code {}", raw_code))?;
        let params = RateClassParams::try_deser(buf, extended)?;
        Ok(RateChange { code, params })
    }
}
