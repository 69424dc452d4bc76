//! The LZSS-family compressor/decompressor used for compressed PBO entries.
//!
//! `expand` and `collapse` operate on byte slices that the caller has
//! already read in full - they mirror the signature of the Rust
//! `dayz_dev_tools_rust` extension the Python reference tooling already
//! shipped (`expand(data, outsize)`, `collapse(data)`), rather than taking a
//! live reader.

use crate::{Error, Result};

const MIN_MATCH_LEN: usize = 3;
const MAX_MATCH_LEN: usize = 18;
const MAX_BACK_DISTANCE: usize = 4095;

/// Sum of every byte as an unsigned integer, wrapping on overflow. Used both
/// to verify a decompressed payload's trailing checksum and to produce the
/// one [`collapse`] appends.
pub fn additive_checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

/// Decompress `input` to exactly `outsize` bytes.
///
/// Stops as soon as either the output is full or the input is exhausted; a
/// well-formed stream produces exactly `outsize` bytes at the same moment
/// the input runs out. Does not read or check a trailing checksum - see
/// [`crate::archive::Entry::unpack`] for that.
pub fn expand(input: &[u8], outsize: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(outsize);
    let mut pos = 0usize;

    while out.len() < outsize && pos < input.len() {
        let flags = input[pos];
        pos += 1;

        for bit in 0..8 {
            if out.len() >= outsize || pos >= input.len() {
                break;
            }

            if (flags >> bit) & 1 == 1 {
                push_truncated(&mut out, &input[pos..pos + 1], outsize);
                pos += 1;
            } else {
                if pos + 2 > input.len() {
                    break;
                }
                let pointer = u16::from_le_bytes([input[pos], input[pos + 1]]);
                pos += 2;

                let back_distance =
                    (pointer & 0xff) as i64 + (((pointer & 0xf000) >> 4) as i64);
                let length = (((pointer >> 8) & 0x0f) as usize) + 3;

                let out_len = out.len() as i64;
                let rpos = out_len - back_distance;

                if rpos < 0 {
                    // Intentional padding behavior for underflowed back
                    // references; preserved for compatibility with the
                    // reference decoder, which fills rather than errors.
                    push_truncated(&mut out, &vec![b' '; length], outsize);
                } else {
                    let rpos = rpos as usize;
                    if rpos + length > out.len() {
                        let chunk = out[rpos..].to_vec();
                        let mut repeated = Vec::with_capacity(length);
                        while repeated.len() < length {
                            repeated.extend_from_slice(&chunk);
                        }
                        repeated.truncate(length);
                        push_truncated(&mut out, &repeated, outsize);
                    } else {
                        let copy = out[rpos..rpos + length].to_vec();
                        push_truncated(&mut out, &copy, outsize);
                    }
                }
            }
        }
    }

    out
}

fn push_truncated(out: &mut Vec<u8>, bytes: &[u8], outsize: usize) {
    let remaining = outsize - out.len();
    let n = bytes.len().min(remaining);
    out.extend_from_slice(&bytes[..n]);
}

/// Compress `input` into a stream `expand` can invert, followed by a 4-byte
/// little-endian additive checksum of `input`.
///
/// Fails with [`Error::NotCompressible`] if no back-reference of at least
/// [`MIN_MATCH_LEN`] bytes can be found anywhere in `input`.
pub fn collapse(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut any_match = false;
    let mut i = 0usize;

    while i < input.len() {
        let mut flag = 0u8;
        let mut packet = Vec::new();
        let mut bit = 0usize;

        while bit < 8 && i < input.len() {
            match find_match(input, i) {
                Some((distance, length)) => {
                    any_match = true;
                    let low = (distance & 0xff) as u8;
                    let high = (((length - 3) & 0x0f) as u8) | ((((distance >> 8) & 0x0f) as u8) << 4);
                    packet.push(low);
                    packet.push(high);
                    i += length;
                }
                None => {
                    flag |= 1 << bit;
                    packet.push(input[i]);
                    i += 1;
                }
            }
            bit += 1;
        }

        out.push(flag);
        out.extend_from_slice(&packet);
    }

    if !any_match {
        return Err(Error::NotCompressible);
    }

    out.extend_from_slice(&additive_checksum(input).to_le_bytes());
    Ok(out)
}

/// Find the longest back-reference ending at `i`, searching within the
/// 4095-byte window. Allows the match to extend past `i` (self-overlapping
/// repeats), matching `expand`'s cyclic-copy behavior.
fn find_match(input: &[u8], i: usize) -> Option<(usize, usize)> {
    let window_start = i.saturating_sub(MAX_BACK_DISTANCE);
    let mut best: Option<(usize, usize)> = None;

    for j in window_start..i {
        let mut len = 0usize;
        while len < MAX_MATCH_LEN && i + len < input.len() && input[j + len] == input[i + len] {
            len += 1;
        }

        if len >= MIN_MATCH_LEN {
            let distance = i - j;
            let better = match best {
                Some((_, best_len)) => len > best_len,
                None => true,
            };
            if better {
                best = Some((distance, len));
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_decodes_literals_then_backreference() {
        let input = [0xff, b'A', b'B', b'C', b'D', b'E', b'F', b'G', b'H', 0x00, 0x07, 0x01];
        assert_eq!(expand(&input, 12), b"ABCDEFGHBCDE");
    }

    #[test]
    fn expand_underflowing_backreference_fills_spaces() {
        let input = [0x0f, b'A', b'B', b'C', b'D', 0x05, 0x0f];
        let expected: Vec<u8> = b"ABCD".iter().copied().chain(std::iter::repeat(b' ').take(18)).collect();
        assert_eq!(expand(&input, 22), expected);
    }

    #[test]
    fn expand_backreference_past_output_end_copies_cyclically() {
        let input = [0x0f, b'A', b'B', b'C', b'D', 0x02, 0x07];
        assert_eq!(expand(&input, 14), b"ABCDCDCDCDCDCD");
    }

    #[test]
    fn checksum_mismatch_message_contains_both_values() {
        let actual = additive_checksum(b"test-data-for-checksum");
        let err = Error::ChecksumMismatch {
            actual: 0x332,
            expected: 0xffffffff,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x332"), "{msg}");
        assert!(msg.contains("0xffffffff"), "{msg}");
        let _ = actual;
    }

    #[test]
    fn collapse_matches_reference_encoding() {
        let input = b"ABCDEFGHIJKLMNOPQRABCDEFGHIJKLMNOPQR";
        let expected: &[u8] = b"\xffABCDEFGH\xffIJKLMNOP\x03QR\x12\x0f\x56\x0a\x00\x00";
        assert_eq!(collapse(input).unwrap(), expected);
    }

    #[test]
    fn collapse_rejects_incompressible_input() {
        match collapse(b"ABCDEFGH") {
            Err(Error::NotCompressible) => {}
            other => panic!("expected NotCompressible, got {other:?}"),
        }
    }

    #[test]
    fn round_trip_for_compressible_input() {
        let input = b"the quick brown fox the quick brown fox the quick brown fox".to_vec();
        let compressed = collapse(&input).unwrap();
        let body_len = compressed.len() - 4;
        let expanded = expand(&compressed[..body_len], input.len());
        assert_eq!(expanded, input);

        let checksum = u32::from_le_bytes(compressed[body_len..].try_into().unwrap());
        assert_eq!(checksum, additive_checksum(&input));
    }
}
