//! FNV-1a hashing.
//!
//! Cluster names and HTTP rule names in the published configuration document
//! are 32-bit FNV-1a hashes of the semantic name, and publish fingerprints
//! are 64-bit FNV-1a hashes of the serialized document. These values are part
//! of the wire contract with the data plane, so the hash is implemented here
//! rather than delegated to a hasher whose output we do not control.

const FNV32_OFFSET: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

pub fn fnv32a(data: &[u8]) -> u32 {
    data.iter().fold(FNV32_OFFSET, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(FNV32_PRIME)
    })
}

pub fn fnv64a(data: &[u8]) -> u64 {
    data.iter().fold(FNV64_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV64_PRIME)
    })
}

/// Renders a semantic name for the configuration document.
///
/// In pretty mode the original name is embedded verbatim; otherwise the name
/// is the decimal FNV-1a hash suffixed with `|<len>` so that the data plane
/// can detect collisions against the original length.
pub fn hashed_name(name: &str, pretty: bool) -> String {
    if pretty {
        name.to_string()
    } else {
        format!("{}|{}", fnv32a(name.as_bytes()), name.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv32a_reference_vectors() {
        assert_eq!(fnv32a(b""), 0x811c_9dc5);
        assert_eq!(fnv32a(b"a"), 0xe40c_292c);
        assert_eq!(fnv32a(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn fnv64a_reference_vectors() {
        assert_eq!(fnv64a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv64a(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv64a(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn hashed_name_embeds_length() {
        let name = "ns1/svc-a|8080";
        let hashed = hashed_name(name, false);
        assert!(hashed.ends_with(&format!("|{}", name.len())));
        assert_eq!(hashed_name(name, true), name);
    }
}
