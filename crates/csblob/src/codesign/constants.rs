//! Blob magics, index slot types and CodeDirectory hash types.

/// `0xfade0c00`: a single requirement expression.
pub const CSMAGIC_REQUIREMENT: u32 = 0xfade0c00;
/// `0xfade0c01`: the requirement set stored in [`CSSLOT_REQUIREMENTS`].
pub const CSMAGIC_REQUIREMENTS: u32 = 0xfade0c01;
/// `0xfade0c02`: a CodeDirectory, primary or alternate.
pub const CSMAGIC_CODEDIRECTORY: u32 = 0xfade0c02;
/// The SuperBlob itself.
pub const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xfade0cc0;
/// A SuperBlob stored outside the binary it signs.
pub const CSMAGIC_DETACHED_SIGNATURE: u32 = 0xfade0cc1;
/// Wrapper around the opaque CMS payload.
pub const CSMAGIC_BLOBWRAPPER: u32 = 0xfade0b01;
/// XML plist entitlements.
pub const CSMAGIC_EMBEDDED_ENTITLEMENTS: u32 = 0xfade7171;
/// DER-encoded entitlements.
pub const CSMAGIC_EMBEDDED_DER_ENTITLEMENTS: u32 = 0xfade7172;

/// Magics whose blobs carry their own big-endian length at byte 4.
pub const KNOWN_BLOB_MAGICS: [u32; 8] = [
    CSMAGIC_REQUIREMENT,
    CSMAGIC_REQUIREMENTS,
    CSMAGIC_CODEDIRECTORY,
    CSMAGIC_EMBEDDED_SIGNATURE,
    CSMAGIC_DETACHED_SIGNATURE,
    CSMAGIC_BLOBWRAPPER,
    CSMAGIC_EMBEDDED_ENTITLEMENTS,
    CSMAGIC_EMBEDDED_DER_ENTITLEMENTS,
];

/// Primary CodeDirectory.
pub const CSSLOT_CODEDIRECTORY: u32 = 0x0000;
/// Hash of the bundle's `Info.plist`; never holds a blob of its own.
pub const CSSLOT_INFOSLOT: u32 = 0x0001;
/// The [`CSMAGIC_REQUIREMENTS`] set.
pub const CSSLOT_REQUIREMENTS: u32 = 0x0002;
/// Hash of the bundle's sealed resources.
pub const CSSLOT_RESOURCEDIR: u32 = 0x0003;
/// Application-defined data.
pub const CSSLOT_APPLICATION: u32 = 0x0004;
/// [`CSMAGIC_EMBEDDED_ENTITLEMENTS`] blob.
pub const CSSLOT_ENTITLEMENTS: u32 = 0x0005;
/// Representation-specific data.
pub const CSSLOT_REP_SPECIFIC: u32 = 0x0006;
/// [`CSMAGIC_EMBEDDED_DER_ENTITLEMENTS`] blob.
pub const CSSLOT_DER_ENTITLEMENTS: u32 = 0x0007;
/// Launch constraint on the process itself.
pub const CSSLOT_LAUNCH_CONSTRAINT_SELF: u32 = 0x0008;
/// Launch constraint on the parent process.
pub const CSSLOT_LAUNCH_CONSTRAINT_PARENT: u32 = 0x0009;
/// Launch constraint on the responsible process.
pub const CSSLOT_LAUNCH_CONSTRAINT_RESPONSIBLE: u32 = 0x000a;
/// Constraint on libraries the process may load.
pub const CSSLOT_LIBRARY_CONSTRAINT: u32 = 0x000b;

/// First slot of the alternate CodeDirectories (one per extra hash type).
pub const CSSLOT_ALTERNATE_CODEDIRECTORIES: u32 = 0x1000;
/// How many alternate CodeDirectory slots exist.
pub const CSSLOT_ALTERNATE_CODEDIRECTORY_MAX: u32 = 5;
/// One past the last alternate CodeDirectory slot.
pub const CSSLOT_ALTERNATE_CODEDIRECTORY_LIMIT: u32 =
    CSSLOT_ALTERNATE_CODEDIRECTORIES + CSSLOT_ALTERNATE_CODEDIRECTORY_MAX;

/// Holds the [`CSMAGIC_BLOBWRAPPER`] blob with the CMS signature.
pub const CSSLOT_SIGNATURESLOT: u32 = 0x10000;
/// Notarization ticket.
pub const CSSLOT_TICKETSLOT: u32 = 0x10001;

/// CodeDirectory without page hashes.
pub const CS_HASHTYPE_NOHASH: u8 = 0;
/// 20-byte SHA-1 page hashes.
pub const CS_HASHTYPE_SHA1: u8 = 1;
/// 32-byte SHA-256 page hashes.
pub const CS_HASHTYPE_SHA256: u8 = 2;
/// SHA-256 cut to 20 bytes.
pub const CS_HASHTYPE_SHA256_TRUNCATED: u8 = 3;
/// 48-byte SHA-384 page hashes.
pub const CS_HASHTYPE_SHA384: u8 = 4;
/// 64-byte SHA-512 page hashes.
pub const CS_HASHTYPE_SHA512: u8 = 5;

/// Whether `magic` is one of the code-signing blob magics.
pub fn is_known_magic(magic: u32) -> bool {
    KNOWN_BLOB_MAGICS.contains(&magic)
}

/// Human-readable kind of a blob, by magic.
pub fn magic_name(magic: u32) -> &'static str {
    match magic {
        CSMAGIC_REQUIREMENT => "Requirement blob",
        CSMAGIC_REQUIREMENTS => "Requirements blob",
        CSMAGIC_CODEDIRECTORY => "Code directory blob",
        CSMAGIC_EMBEDDED_SIGNATURE => "Embedded signature blob",
        CSMAGIC_DETACHED_SIGNATURE => "Detached signature blob",
        CSMAGIC_EMBEDDED_ENTITLEMENTS => "Entitlements blob",
        CSMAGIC_EMBEDDED_DER_ENTITLEMENTS => "DER entitlements blob",
        CSMAGIC_BLOBWRAPPER => "Signature blob",
        _ => "Unknown blob type",
    }
}

/// Name of an index slot type.
pub fn slot_name(slot: u32) -> &'static str {
    match slot {
        CSSLOT_CODEDIRECTORY => "CodeDirectory",
        CSSLOT_INFOSLOT => "Info.plist",
        CSSLOT_REQUIREMENTS => "Requirements",
        CSSLOT_RESOURCEDIR => "ResourceDir",
        CSSLOT_APPLICATION => "Application",
        CSSLOT_ENTITLEMENTS => "Entitlements",
        CSSLOT_REP_SPECIFIC => "RepSpecific",
        CSSLOT_DER_ENTITLEMENTS => "DER Entitlements",
        CSSLOT_LAUNCH_CONSTRAINT_SELF => "Launch Constraint (self)",
        CSSLOT_LAUNCH_CONSTRAINT_PARENT => "Launch Constraint (parent)",
        CSSLOT_LAUNCH_CONSTRAINT_RESPONSIBLE => "Launch Constraint (responsible)",
        CSSLOT_LIBRARY_CONSTRAINT => "Library Constraint",
        s if (CSSLOT_ALTERNATE_CODEDIRECTORIES..CSSLOT_ALTERNATE_CODEDIRECTORY_LIMIT).contains(&s) => {
            "Alternate CodeDirectory"
        }
        CSSLOT_SIGNATURESLOT => "CMS Signature",
        CSSLOT_TICKETSLOT => "Ticket",
        _ => "Unknown",
    }
}

/// Name of a CodeDirectory hash type.
pub fn hash_type_name(hash_type: u8) -> &'static str {
    match hash_type {
        CS_HASHTYPE_NOHASH => "none",
        CS_HASHTYPE_SHA1 => "SHA-1",
        CS_HASHTYPE_SHA256 => "SHA-256",
        CS_HASHTYPE_SHA256_TRUNCATED => "SHA-256 (truncated)",
        CS_HASHTYPE_SHA384 => "SHA-384",
        CS_HASHTYPE_SHA512 => "SHA-512",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_magics_share_prefix() {
        assert!(KNOWN_BLOB_MAGICS.iter().all(|m| m >> 16 == 0xfade));
    }

    #[test]
    fn test_magic_names() {
        assert_eq!(magic_name(CSMAGIC_CODEDIRECTORY), "Code directory blob");
        assert_eq!(magic_name(CSMAGIC_BLOBWRAPPER), "Signature blob");
        assert_eq!(magic_name(0x1234_5678), "Unknown blob type");
        assert!(is_known_magic(CSMAGIC_REQUIREMENT));
        assert!(!is_known_magic(0xfade0000));
    }

    #[test]
    fn test_slot_names() {
        assert_eq!(slot_name(CSSLOT_CODEDIRECTORY), "CodeDirectory");
        assert_eq!(slot_name(0x1002), "Alternate CodeDirectory");
        assert_eq!(slot_name(CSSLOT_ALTERNATE_CODEDIRECTORY_LIMIT), "Unknown");
        assert_eq!(slot_name(CSSLOT_SIGNATURESLOT), "CMS Signature");
    }
}
