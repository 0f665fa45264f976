use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};

/// A single tag-length-value field: tag (u16 BE), length (u16 BE), value
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tlv {
    pub tag: u16,
    pub value: Bytes,
}

impl Tlv {
    pub fn new(tag: u16, value: impl Into<Bytes>) -> Tlv {
        Tlv { tag, value: value.into() }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.tag);
        buf.put_u16(self.value.len() as u16);
        buf.put_slice(&self.value);
    }

    pub fn try_deser(buf: &mut Bytes) -> anyhow::Result<Tlv> {
        let tag = buf.try_get_u16()?;
        let len = buf.try_get_u16()? as usize;
        if buf.remaining() < len {
            bail!("TLV 0x{:04X} declares {} bytes, only {} remaining", tag, len, buf.remaining());
        }
        Ok(Tlv {
            tag,
            value: buf.split_to(len),
        })
    }
}

/// A sequence of TLVs running to the end of a buffer, in wire order. Tags may repeat.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TlvChain(pub Vec<Tlv>);

impl TlvChain {
    pub fn try_deser(mut buf: Bytes) -> anyhow::Result<TlvChain> {
        let mut tlvs = Vec::new();
        while buf.has_remaining() {
            tlvs.push(Tlv::try_deser(&mut buf)?);
        }
        Ok(TlvChain(tlvs))
    }

    pub fn get(&self, tag: u16) -> Option<&Bytes> {
        self.0.iter()
            .find(|tlv| tlv.tag == tag)
            .map(|tlv| &tlv.value)
    }

    pub fn get_u16(&self, tag: u16) -> Option<u16> {
        let mut value = self.get(tag)?.clone();
        value.try_get_u16().ok()
    }

    pub fn get_string(&self, tag: u16) -> anyhow::Result<Option<String>> {
        match self.get(tag) {
            None => Ok(None),
            Some(raw) => Ok(Some(String::from_utf8(raw.to_vec())?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rstest::rstest;
    use super::*;

    #[test]
    fn test_ser() {
        let mut buf = BytesMut::new();
        Tlv::new(0x0006, Bytes::from_static(b"abc")).ser(&mut buf);
        assert_eq!(buf.as_ref(), b"\0\x06\0\x03abc");
    }

    #[rstest]
    #[case::empty(b"", Some(vec![]))]
    #[case::single(b"\0\x05\0\x02ab", Some(vec![(5, b"ab".as_slice())]))]
    #[case::repeated(b"\0\x05\0\x01a\0\x05\0\0", Some(vec![(5, b"a".as_slice()), (5, b"".as_slice())]))]
    #[case::truncated_value(b"\0\x05\0\x04ab", None)]
    #[case::truncated_header(b"\0\x05\0", None)]
    fn test_chain_try_deser(#[case] raw: &'static [u8], #[case] expected: Option<Vec<(u16, &[u8])>>) {
        match TlvChain::try_deser(Bytes::from_static(raw)) {
            Ok(chain) => {
                let actual = chain.0.iter()
                    .map(|tlv| (tlv.tag, tlv.value.as_ref()))
                    .collect::<Vec<_>>();
                assert_eq!(actual, expected.unwrap());
            }
            Err(_) => assert!(expected.is_none()),
        }
    }

    #[test]
    fn test_accessors() {
        let chain = TlvChain::try_deser(Bytes::from_static(b"\0\x0d\0\x02\0\x0e\0\x05\0\x04host")).unwrap();
        assert_eq!(chain.get_u16(0x000d), Some(0x000e));
        assert_eq!(chain.get_string(0x0005).unwrap(), Some("host".to_string()));
        assert_eq!(chain.get_string(0x0006).unwrap(), None);
        assert_eq!(chain.get_u16(0x0005), Some(0x686f));
    }
}
