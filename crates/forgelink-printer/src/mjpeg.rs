// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Still-image extraction from the printer's MJPEG camera stream.

/// JPEG start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Pull the first complete JPEG frame out of a chunked MJPEG stream.
///
/// Chunks are accumulated until an SOI marker followed by an EOI marker has
/// been seen; the frame (markers included) is returned. Returns `None` if the
/// stream ends first. Multipart boundaries and headers around the frame are
/// discarded.
pub fn extract_jpeg<I, B>(chunks: I) -> Option<Vec<u8>>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut data = Vec::new();
    let mut start = None;

    for chunk in chunks {
        // A marker may straddle two chunks; back up one byte.
        let scan_from = data.len().saturating_sub(1);
        data.extend_from_slice(chunk.as_ref());

        let soi = match start {
            Some(soi) => soi,
            None => match find(&data[scan_from..], &SOI) {
                Some(pos) => {
                    start = Some(scan_from + pos);
                    scan_from + pos
                }
                None => continue,
            },
        };

        let eoi_from = (soi + SOI.len()).max(scan_from);
        if let Some(pos) = find(&data[eoi_from..], &EOI) {
            let end = eoi_from + pos + EOI.len();
            return Some(data[soi..end].to_vec());
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}
