use std::fmt::{Debug, Formatter};
use rustc_hash::FxHashMap;

/// A protocol family ("SNAC family", "service"): a numbered subsystem of OSCAR. Every SNAC is
///  identified by its family and a family-specific subtype.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FamilyId(pub u16);

impl FamilyId {
    /// The generic service family. Every connection serves it implicitly, and session-wide
    ///  control messages travel through it on the primary connection.
    pub const OSERVICE: FamilyId = FamilyId(0x0001);
    pub const LOCATE: FamilyId = FamilyId(0x0002);
    pub const BUDDY: FamilyId = FamilyId(0x0003);
    pub const ICBM: FamilyId = FamilyId(0x0004);
    pub const ADVERT: FamilyId = FamilyId(0x0005);
    pub const INVITE: FamilyId = FamilyId(0x0006);
    pub const ADMIN: FamilyId = FamilyId(0x0007);
    pub const POPUP: FamilyId = FamilyId(0x0008);
    pub const BOS: FamilyId = FamilyId(0x0009);
    pub const USER_LOOKUP: FamilyId = FamilyId(0x000A);
    pub const STATS: FamilyId = FamilyId(0x000B);
    pub const TRANSLATE: FamilyId = FamilyId(0x000C);
    pub const CHAT_NAV: FamilyId = FamilyId(0x000D);
    pub const CHAT: FamilyId = FamilyId(0x000E);
    pub const ODIR: FamilyId = FamilyId(0x000F);
    pub const BART: FamilyId = FamilyId(0x0010);
    pub const SSI: FamilyId = FamilyId(0x0013);
    pub const ICQ: FamilyId = FamilyId(0x0015);
    pub const AUTH: FamilyId = FamilyId(0x0017);
    pub const ALERT: FamilyId = FamilyId(0x0018);
}

impl Debug for FamilyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FamilyDescriptor {
    pub family: FamilyId,
    pub version: u16,
    pub tool_id: u16,
    pub tool_version: u16,
    pub name: &'static str,
    pub description: &'static str,
}

const TOOL_ID_CLIENT: u16 = 0x0110;
const TOOL_ID_SERVICE: u16 = 0x0010;
const TOOL_VERSION: u16 = 0x0629;

const STANDARD_FAMILIES: [(FamilyId, u16, u16, u16, &str, &str); 20] = [
    (FamilyId::OSERVICE,    3, TOOL_ID_CLIENT,  TOOL_VERSION, "oservice",   "Basic OSCAR service"),
    (FamilyId::LOCATE,      1, TOOL_ID_CLIENT,  TOOL_VERSION, "locate",     "User location and profiles"),
    (FamilyId::BUDDY,       1, TOOL_ID_CLIENT,  TOOL_VERSION, "buddy",      "Buddy presence notifications"),
    (FamilyId::ICBM,        1, TOOL_ID_CLIENT,  TOOL_VERSION, "icbm",       "Inter-client messaging"),
    (FamilyId::ADVERT,      1, TOOL_ID_CLIENT,  TOOL_VERSION, "advert",     "Advertisements"),
    (FamilyId::INVITE,      1, TOOL_ID_CLIENT,  TOOL_VERSION, "invite",     "Buddy invitations"),
    (FamilyId::ADMIN,       1, TOOL_ID_SERVICE, TOOL_VERSION, "admin",      "Account administration"),
    (FamilyId::POPUP,       1, TOOL_ID_CLIENT,  TOOL_VERSION, "popup",      "Server popup notices"),
    (FamilyId::BOS,         1, TOOL_ID_CLIENT,  TOOL_VERSION, "bos",        "Privacy and permit/deny lists"),
    (FamilyId::USER_LOOKUP, 1, TOOL_ID_CLIENT,  TOOL_VERSION, "userlookup", "User search by email"),
    (FamilyId::STATS,       1, TOOL_ID_CLIENT,  TOOL_VERSION, "stats",      "Usage statistics reporting"),
    (FamilyId::TRANSLATE,   1, TOOL_ID_CLIENT,  TOOL_VERSION, "translate",  "Translation service"),
    (FamilyId::CHAT_NAV,    1, TOOL_ID_SERVICE, TOOL_VERSION, "chatnav",    "Chat room navigation"),
    (FamilyId::CHAT,        1, TOOL_ID_SERVICE, TOOL_VERSION, "chat",       "Chat rooms"),
    (FamilyId::ODIR,        1, TOOL_ID_SERVICE, TOOL_VERSION, "odir",       "Directory search"),
    (FamilyId::BART,        1, TOOL_ID_SERVICE, TOOL_VERSION, "bart",       "Buddy icons and other assets"),
    (FamilyId::SSI,         4, TOOL_ID_CLIENT,  TOOL_VERSION, "ssi",        "Server-stored contact list"),
    (FamilyId::ICQ,         1, TOOL_ID_CLIENT,  0x047C,       "icq",        "ICQ extensions and meta info"),
    (FamilyId::AUTH,        1, 0x0000,          0x0000,       "auth",       "Authorization and registration"),
    (FamilyId::ALERT,       1, TOOL_ID_SERVICE, TOOL_VERSION, "alert",      "Email alerts"),
];

/// Static table of the families this client understands. A family that is not in the catalog
///  has no version, and the client never routes traffic for it.
#[derive(Debug)]
pub struct FamilyCatalog {
    families: FxHashMap<FamilyId, FamilyDescriptor>,
}

impl Default for FamilyCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl FamilyCatalog {
    pub fn new() -> FamilyCatalog {
        let families = STANDARD_FAMILIES.iter()
            .map(|&(family, version, tool_id, tool_version, name, description)| {
                (family, FamilyDescriptor { family, version, tool_id, tool_version, name, description })
            })
            .collect();

        FamilyCatalog { families }
    }

    /// The protocol version this client speaks for a family, or `None` if the family is
    ///  unsupported.
    pub fn version(&self, family: FamilyId) -> Option<u16> {
        self.families.get(&family)
            .map(|d| d.version)
    }

    pub fn is_supported(&self, family: FamilyId) -> bool {
        self.families.contains_key(&family)
    }

    pub fn descriptor(&self, family: FamilyId) -> Option<&FamilyDescriptor> {
        self.families.get(&family)
    }

    pub fn name(&self, family: FamilyId) -> &'static str {
        self.families.get(&family)
            .map(|d| d.name)
            .unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::oservice(FamilyId::OSERVICE, Some(3))]
    #[case::chat_nav(FamilyId::CHAT_NAV, Some(1))]
    #[case::ssi(FamilyId::SSI, Some(4))]
    #[case::unknown(FamilyId(0x0044), None)]
    #[case::gap(FamilyId(0x0011), None)]
    fn test_version(#[case] family: FamilyId, #[case] expected: Option<u16>) {
        let catalog = FamilyCatalog::new();
        assert_eq!(catalog.version(family), expected);
        assert_eq!(catalog.is_supported(family), expected.is_some());
    }

    #[test]
    fn test_descriptor() {
        let catalog = FamilyCatalog::new();
        let descriptor = catalog.descriptor(FamilyId::ICQ).unwrap();
        assert_eq!(descriptor.tool_id, 0x0110);
        assert_eq!(descriptor.tool_version, 0x047C);
        assert_eq!(catalog.name(FamilyId::ICQ), "icq");
        assert_eq!(catalog.name(FamilyId(0x7777)), "unknown");
    }

    #[test]
    fn test_family_id_debug() {
        assert_eq!(format!("{:?}", FamilyId::CHAT_NAV), "0x000D");
    }
}
