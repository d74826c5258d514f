//! Frame token strings
//!
//! Climbs are stored as a run of `p<placementId>r<roleId>` tokens with no
//! delimiter, e.g. `p5r12p200r7`.

use crate::domain::models::ClimbPlacements;
use crate::error::FrameError;
use std::fmt::Write;
use tracing::debug;

/// Serialize placements as frame tokens, ascending by placement id.
pub fn encode(placements: &ClimbPlacements) -> String {
    let mut frames = String::with_capacity(placements.len() * 8);
    for (placement_id, role_id) in placements.iter() {
        // Writing into a String cannot fail
        let _ = write!(frames, "p{}r{}", placement_id, role_id);
    }
    frames
}

/// Parse frame tokens.
///
/// Every `p<digits>r<digits>` occurrence is taken; anything in between is
/// skipped. A repeated placement id keeps its last role. Tokens whose numbers
/// do not fit a `u32` are skipped as well.
pub fn decode(frames: &str) -> ClimbPlacements {
    let bytes = frames.as_bytes();
    let mut placements = ClimbPlacements::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'p' {
            i += 1;
            continue;
        }

        match parse_token(bytes, i + 1) {
            Some((token, end)) => {
                match token {
                    Some((placement_id, role_id)) => {
                        placements.set_role(placement_id, role_id);
                    }
                    None => debug!(
                        "Skipping frame token with out-of-range id: {}",
                        &frames[i..end]
                    ),
                }
                i = end;
            }
            None => i += 1,
        }
    }

    placements
}

/// Parse frame tokens from raw bytes, rejecting input that is not text.
pub fn decode_bytes(frames: &[u8]) -> Result<ClimbPlacements, FrameError> {
    let text = std::str::from_utf8(frames)?;
    Ok(decode(text))
}

/// Match `<digits>r<digits>` at `start`. Returns the parsed pair (or `None`
/// on numeric overflow) and the index just past the token.
fn parse_token(bytes: &[u8], start: usize) -> Option<(Option<(u32, u32)>, usize)> {
    let placement_end = digits_end(bytes, start)?;
    if bytes.get(placement_end) != Some(&b'r') {
        return None;
    }
    let role_end = digits_end(bytes, placement_end + 1)?;

    let placement = parse_u32(&bytes[start..placement_end]);
    let role = parse_u32(&bytes[placement_end + 1..role_end]);
    Some((placement.zip(role), role_end))
}

/// End of a non-empty ASCII digit run starting at `start`.
fn digits_end(bytes: &[u8], start: usize) -> Option<usize> {
    let len = bytes
        .get(start..)?
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    (len > 0).then_some(start + len)
}

fn parse_u32(digits: &[u8]) -> Option<u32> {
    digits.iter().try_fold(0u32, |acc, d| {
        acc.checked_mul(10)?.checked_add(u32::from(d - b'0'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_sorted() {
        let placements: ClimbPlacements = vec![(200, 7), (5, 12)].into();
        assert_eq!(encode(&placements), "p5r12p200r7");
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode(&ClimbPlacements::new()), "");
    }

    #[test]
    fn test_decode_example() {
        let placements = decode("p5r12p200r7");
        assert_eq!(placements.to_pairs(), vec![(5, 12), (200, 7)]);
    }

    #[test]
    fn test_decode_unordered_input() {
        let placements = decode("p1090r15p1073r12p1134r13");
        assert_eq!(
            placements.to_pairs(),
            vec![(1073, 12), (1090, 15), (1134, 13)]
        );
    }

    #[test]
    fn test_decode_duplicate_last_wins() {
        let placements = decode("p5r12p5r14");
        assert_eq!(placements.to_pairs(), vec![(5, 14)]);
    }

    #[test]
    fn test_decode_skips_malformed() {
        let placements = decode("xxp5r12p?r3pp7r1 p8r p9rr2,p10r4");
        assert_eq!(placements.to_pairs(), vec![(5, 12), (7, 1), (10, 4)]);
    }

    #[test]
    fn test_decode_skips_overflow() {
        let placements = decode("p99999999999r1p3r4");
        assert_eq!(placements.to_pairs(), vec![(3, 4)]);
    }

    #[test]
    fn test_decode_garbage_is_empty() {
        assert!(decode("").is_empty());
        assert!(decode("hello world").is_empty());
        assert!(decode("p").is_empty());
        assert!(decode("p12r").is_empty());
    }

    #[test]
    fn test_round_trip() {
        let cases: Vec<Vec<(u32, u32)>> = vec![
            vec![],
            vec![(0, 0)],
            vec![(5, 12), (200, 7)],
            vec![(u32::MAX, 1), (1, u32::MAX), (10, 10)],
        ];
        for pairs in cases {
            let placements: ClimbPlacements = pairs.into();
            assert_eq!(decode(&encode(&placements)), placements);
        }
    }

    #[test]
    fn test_decode_bytes_rejects_non_text() {
        assert!(decode_bytes(&[0x70, 0xff, 0xfe]).is_err());
        let placements = decode_bytes(b"p5r12").unwrap();
        assert_eq!(placements.get(5), Some(12));
    }
}
