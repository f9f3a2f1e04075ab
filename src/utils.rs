//! Identifier minting

use bech32::Bech32m;
use uuid7::uuid7;

pub const DOCUMENT_HRP: &str = "doc_";
pub const VERSION_HRP: &str = "ver_";
pub const INSTANCE_HRP: &str = "appr_";

// construct a unique time-ordered id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub(crate) fn new_id(hrp: &str) -> crate::error::Result<String> {
    new_uuid_to_bech32(hrp).map_err(|e| crate::error::DocumentError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        let id = new_uuid_to_bech32(VERSION_HRP).unwrap();
        assert!(id.starts_with("ver_1"));
    }

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    #[test]
    fn ids_are_unique() {
        let a = new_uuid_to_bech32(DOCUMENT_HRP).unwrap();
        let b = new_uuid_to_bech32(DOCUMENT_HRP).unwrap();
        assert_ne!(a, b);
    }
}
