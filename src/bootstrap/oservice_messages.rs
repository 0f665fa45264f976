use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::debug;

use crate::family::{FamilyCatalog, FamilyId};
use crate::tlv::{Tlv, TlvChain};

/// Subtypes of the generic service family that take part in the connection handshake or are
///  otherwise handled by the control plane
#[repr(u16)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum OServiceSubtype {
    Error = 0x0001,
    ClientReady = 0x0002,
    ServerReady = 0x0003,
    NewServiceRequest = 0x0004,
    NewServiceRedirect = 0x0005,
    RateRequest = 0x0006,
    RateResponse = 0x0007,
    RateAck = 0x0008,
    RateChange = 0x000A,
    SelfInfoRequest = 0x000E,
    Motd = 0x0013,
    ClientVersions = 0x0017,
    ServerVersions = 0x0018,
}

/// Server ready (0x0003): the families the server serves on this connection, as a plain list of
///  u16 values
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerReady {
    pub families: Vec<FamilyId>,
}

impl ServerReady {
    pub fn try_deser(mut buf: Bytes) -> anyhow::Result<ServerReady> {
        if buf.remaining() % 2 != 0 {
            bail!("server ready payload has odd length {}", buf.remaining());
        }

        let mut families = Vec::with_capacity(buf.remaining() / 2);
        while buf.has_remaining() {
            families.push(FamilyId(buf.get_u16()));
        }
        Ok(ServerReady { families })
    }
}

/// Client versions (0x0017): (family, version) for each of the given families, in the order
///  given. Families without a version in the catalog are skipped.
pub fn client_versions_payload(families: impl IntoIterator<Item = FamilyId>, catalog: &FamilyCatalog) -> Bytes {
    let mut buf = BytesMut::new();
    for family in families {
        if let Some(version) = catalog.version(family) {
            buf.put_u16(family.0);
            buf.put_u16(version);
        }
    }
    buf.freeze()
}

/// Server versions (0x0018): (family, version) pairs
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerVersions {
    pub versions: Vec<(FamilyId, u16)>,
}

impl ServerVersions {
    /// Reads as many complete pairs as there are. Trailing bytes are logged and ignored.
    pub fn deser(mut buf: Bytes) -> ServerVersions {
        let mut versions = Vec::with_capacity(buf.remaining() / 4);
        while buf.remaining() >= 4 {
            versions.push((FamilyId(buf.get_u16()), buf.get_u16()));
        }
        if buf.has_remaining() {
            debug!("server versions with {} trailing bytes - ignoring them: {:?}", buf.remaining(), buf.as_ref());
        }
        ServerVersions { versions }
    }

    pub fn version(&self, family: FamilyId) -> Option<u16> {
        self.versions.iter()
            .find(|(f, _)| *f == family)
            .map(|(_, v)| *v)
    }
}

/// Client ready (0x0002) - per family, all numbers in network byte order (BE):
/// ```ascii
/// 0: family (u16)
/// 2: version (u16)
/// 4: tool id (u16)
/// 6: tool version (u16)
/// ```
pub fn client_ready_payload(families: impl IntoIterator<Item = FamilyId>, catalog: &FamilyCatalog) -> Bytes {
    let mut buf = BytesMut::new();
    for family in families {
        if let Some(descriptor) = catalog.descriptor(family) {
            buf.put_u16(descriptor.family.0);
            buf.put_u16(descriptor.version);
            buf.put_u16(descriptor.tool_id);
            buf.put_u16(descriptor.tool_version);
        }
    }
    buf.freeze()
}

pub fn new_service_request_payload(family: FamilyId) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u16(family.0);
    buf.freeze()
}

pub const TLV_FAMILY: u16 = 0x000D;
pub const TLV_ADDRESS: u16 = 0x0005;
pub const TLV_COOKIE: u16 = 0x0006;

/// New service redirect (0x0005): where to connect for a requested family, as a TLV chain
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewServiceRedirect {
    pub family: FamilyId,
    pub host: String,
    pub port: u16,
    pub cookie: Option<Bytes>,
}

impl NewServiceRedirect {
    /// Some servers put two extra bytes in front of the TLV chain. If the payload does not parse
    ///  as a chain containing the family, it is parsed again without its first two bytes.
    pub fn try_deser(buf: Bytes, default_port: u16) -> anyhow::Result<NewServiceRedirect> {
        let chain = match TlvChain::try_deser(buf.clone()) {
            Ok(chain) if chain.get(TLV_FAMILY).is_some() => chain,
            _ if buf.len() >= 2 => {
                debug!("new service redirect does not start with a TLV chain - skipping two bytes");
                TlvChain::try_deser(buf.slice(2..))?
            }
            _ => bail!("new service redirect too short: {} bytes", buf.len()),
        };

        let Some(family) = chain.get_u16(TLV_FAMILY) else {
            bail!("new service redirect without family");
        };
        let Some(address) = chain.get_string(TLV_ADDRESS)? else {
            bail!("new service redirect for family {:?} without address", FamilyId(family));
        };
        let (host, port) = parse_address(&address, default_port)?;

        Ok(NewServiceRedirect {
            family: FamilyId(family),
            host,
            port,
            cookie: chain.get(TLV_COOKIE).cloned(),
        })
    }
}

/// splits `host[:port]`
pub fn parse_address(address: &str, default_port: u16) -> anyhow::Result<(String, u16)> {
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>()?),
        None => (address, default_port),
    };
    if host.is_empty() {
        bail!("redirect address without host: {:?}", address);
    }
    Ok((host.to_string(), port))
}

/// Payload of the FLAP sign-on frame (channel 1) on a connection that was set up with a
///  redirect cookie: protocol version 1 (u32), followed by the cookie as TLV 0x0006
pub fn sign_on_payload(cookie: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + cookie.len());
    buf.put_u32(1);
    Tlv::new(TLV_COOKIE, cookie.clone()).ser(&mut buf);
    buf.freeze()
}

/// Error (0x0001): an error code, optionally followed by TLVs that are ignored here
pub fn error_code(mut buf: Bytes) -> Option<u16> {
    buf.try_get_u16().ok()
}

/// Message of the day (0x0013): a type code followed by TLVs; TLV 0x000B holds the text
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Motd {
    pub motd_type: u16,
    pub text: Option<String>,
}

impl Motd {
    pub fn try_deser(mut buf: Bytes) -> anyhow::Result<Motd> {
        let motd_type = buf.try_get_u16()?;
        let chain = TlvChain::try_deser(buf)?;
        Ok(Motd {
            motd_type,
            text: chain.get_string(0x000B)?,
        })
    }
}
