//! Strict PEM block handling.
//!
//! The REST surface accepts PEM strings and must reject anything that is
//! not armor plus whitespace. The `pem` crate parses individual blocks;
//! the splitting logic here walks the input so that junk before, between
//! or after blocks surfaces as `InvalidPem` instead of being skipped.

use crate::error::{Result, VaultError};
use pem::Pem;

const BEGIN_MARKER: &str = "-----BEGIN ";
const END_MARKER: &str = "-----END ";

/// Split a concatenated PEM stream into its blocks. Whitespace around and
/// between blocks is tolerated; any other residual bytes are an error.
pub fn parse_pem_blocks(input: &str) -> Result<Vec<Pem>> {
    let mut blocks = Vec::new();
    let mut rest = input;

    loop {
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            return Ok(blocks);
        }
        if !trimmed.starts_with(BEGIN_MARKER) {
            return Err(VaultError::InvalidPem(
                "unexpected data outside pem armor".to_string(),
            ));
        }

        let end_start = trimmed
            .find(END_MARKER)
            .ok_or_else(|| VaultError::InvalidPem("missing end marker".to_string()))?;
        let after_end = &trimmed[end_start + END_MARKER.len()..];
        let close = after_end
            .find("-----")
            .ok_or_else(|| VaultError::InvalidPem("unterminated end marker".to_string()))?;
        let block_end = end_start + END_MARKER.len() + close + "-----".len();

        let (block_str, remainder) = trimmed.split_at(block_end);
        let block = pem::parse(block_str)
            .map_err(|e| VaultError::InvalidPem(format!("malformed pem block: {e}")))?;
        blocks.push(block);
        rest = remainder;
    }
}

/// Decode exactly one PEM block; more than one block or trailing garbage
/// is rejected.
pub fn parse_single_pem(input: &str) -> Result<Pem> {
    let mut blocks = parse_pem_blocks(input)?;
    match blocks.len() {
        0 => Err(VaultError::InvalidPem("empty pem input".to_string())),
        1 => Ok(blocks.remove(0)),
        n => Err(VaultError::InvalidPem(format!(
            "expected one pem block, found {n}"
        ))),
    }
}

/// Re-armor DER bytes under the given label.
pub fn encode_pem(tag: &str, der: &[u8]) -> String {
    pem::encode(&Pem::new(tag, der))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tag: &str, payload: &[u8]) -> String {
        encode_pem(tag, payload)
    }

    #[test]
    fn test_single_block_round_trip() {
        let encoded = sample("CERTIFICATE", b"payload");
        let block = parse_single_pem(&encoded).unwrap();
        assert_eq!(block.tag(), "CERTIFICATE");
        assert_eq!(block.contents(), b"payload");
    }

    #[test]
    fn test_trailing_whitespace_tolerated() {
        let encoded = format!("{}\n  \n", sample("RSA PRIVATE KEY", b"abc"));
        assert!(parse_single_pem(&encoded).is_ok());
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let encoded = format!("{}garbage", sample("CERTIFICATE", b"abc"));
        let err = parse_single_pem(&encoded).unwrap_err();
        assert!(matches!(err, VaultError::InvalidPem(_)));
    }

    #[test]
    fn test_two_blocks_rejected_as_single() {
        let encoded = format!(
            "{}{}",
            sample("CERTIFICATE", b"one"),
            sample("CERTIFICATE", b"two")
        );
        assert!(parse_single_pem(&encoded).is_err());
    }

    #[test]
    fn test_stream_splits_blocks_in_order() {
        let encoded = format!(
            "{}\n{}",
            sample("CERTIFICATE", b"one"),
            sample("EC PRIVATE KEY", b"two")
        );
        let blocks = parse_pem_blocks(&encoded).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].contents(), b"one");
        assert_eq!(blocks[1].tag(), "EC PRIVATE KEY");
    }

    #[test]
    fn test_empty_stream_is_empty_vec() {
        assert!(parse_pem_blocks("  \n ").unwrap().is_empty());
    }

    #[test]
    fn test_blocks_equal_after_whitespace_differences() {
        let a = parse_single_pem(&sample("CERTIFICATE", b"same")).unwrap();
        let b = parse_single_pem(&format!("\n\n{}\n\n", sample("CERTIFICATE", b"same"))).unwrap();
        assert_eq!(a.tag(), b.tag());
        assert_eq!(a.contents(), b.contents());
    }
}
