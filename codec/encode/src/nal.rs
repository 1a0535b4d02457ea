/*!
    Annex-B helpers for turning codec extradata into configuration blobs.
*/

/// H.264 sequence parameter set.
pub const H264_NAL_SPS: u8 = 7;
/// H.264 picture parameter set.
pub const H264_NAL_PPS: u8 = 8;

/**
    Split an Annex-B byte stream into NAL units, each keeping its start code.
*/
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let starts = start_codes(data);
    let mut units = Vec::with_capacity(starts.len());
    for (i, &(pos, _)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map_or(data.len(), |&(next, _)| next);
        units.push(&data[pos..end]);
    }
    units
}

/**
    Type of an H.264 NAL unit that still carries its start code.
*/
pub fn h264_nal_type(unit: &[u8]) -> Option<u8> {
    let header = match unit {
        [0, 0, 0, 1, header, ..] => *header,
        [0, 0, 1, header, ..] => *header,
        _ => return None,
    };
    Some(header & 0x1f)
}

/**
    Split H.264 extradata into `[sps, pps]`, start codes included.

    Several units of the same type are concatenated. Returns `None` when
    either parameter set is missing, e.g. for avcC-formatted extradata.
*/
pub fn h264_parameter_sets(extradata: &[u8]) -> Option<[Vec<u8>; 2]> {
    let mut sps = Vec::new();
    let mut pps = Vec::new();
    for unit in split_annex_b(extradata) {
        match h264_nal_type(unit) {
            Some(H264_NAL_SPS) => sps.extend_from_slice(unit),
            Some(H264_NAL_PPS) => pps.extend_from_slice(unit),
            _ => {}
        }
    }
    if sps.is_empty() || pps.is_empty() {
        return None;
    }
    Some([sps, pps])
}

// (offset, start code length)
fn start_codes(data: &[u8]) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                found.push((i, 3));
                i += 3;
                continue;
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                found.push((i, 4));
                i += 4;
                continue;
            }
        }
        i += 1;
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTRADATA: &[u8] = &[
        0, 0, 0, 1, 0x67, 0x42, 0xc0, 0x1e, // SPS
        0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80, // PPS
    ];

    #[test]
    fn splits_on_both_start_code_lengths() {
        let data = [0, 0, 1, 0x67, 0xaa, 0, 0, 0, 1, 0x68, 0xbb];
        let units = split_annex_b(&data);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], &[0, 0, 1, 0x67, 0xaa]);
        assert_eq!(units[1], &[0, 0, 0, 1, 0x68, 0xbb]);
    }

    #[test]
    fn extracts_sps_and_pps() {
        let [sps, pps] = h264_parameter_sets(EXTRADATA).unwrap();
        assert_eq!(sps, &EXTRADATA[..8]);
        assert_eq!(pps, &EXTRADATA[8..]);
        assert_eq!(h264_nal_type(&sps), Some(H264_NAL_SPS));
        assert_eq!(h264_nal_type(&pps), Some(H264_NAL_PPS));
    }

    #[test]
    fn avcc_extradata_is_not_annex_b() {
        let avcc = [0x01, 0x42, 0xc0, 0x1e, 0xff, 0xe1, 0x00, 0x04];
        assert!(h264_parameter_sets(&avcc).is_none());
    }
}
