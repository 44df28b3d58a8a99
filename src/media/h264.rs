//! H.264 Annex B helpers

const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;

/// Iterate the NAL units of an Annex B buffer as `(type, unit)`; the unit
/// excludes its start code.
pub fn nal_units(data: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let count = starts.len();
    (0..count).filter_map(move |n| {
        let (_, begin) = starts[n];
        let mut end = match starts.get(n + 1) {
            Some(&(next, _)) => next,
            None => data.len(),
        };
        // Leading zero of a four byte start code belongs to the next unit
        while end > begin && data[end - 1] == 0 && n + 1 < count {
            end -= 1;
        }
        let unit = &data[begin..end];
        unit.first().map(|header| (header & 0x1F, unit))
    })
}

/// Check if the buffer contains an IDR slice
pub fn contains_idr(data: &[u8]) -> bool {
    nal_units(data).any(|(kind, _)| kind == NAL_IDR)
}

/// SPS and PPS units of `data`, re-joined with four byte start codes
pub fn parameter_sets(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    for (kind, unit) in nal_units(data) {
        if kind == NAL_SPS || kind == NAL_PPS {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(unit);
        }
    }
    (!out.is_empty()).then_some(out)
}
