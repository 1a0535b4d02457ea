/*!
    AAC-LC stream helpers.
*/

const SAMPLING_FREQUENCIES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// MPEG-4 audio object type for AAC low complexity.
pub const OBJECT_TYPE_LC: u8 = 2;

/**
    MPEG-4 sampling frequency index, if the rate is a standard one.
*/
pub fn sampling_frequency_index(sample_rate: u32) -> Option<u8> {
    SAMPLING_FREQUENCIES
        .iter()
        .position(|&rate| rate == sample_rate)
        .map(|i| i as u8)
}

/**
    Two-byte AudioSpecificConfig for AAC-LC, the `csd-0` of an AAC stream.
*/
pub fn audio_specific_config(sample_rate: u32, channels: u16) -> Option<[u8; 2]> {
    let index = sampling_frequency_index(sample_rate)?;
    let channels = (channels as u8) & 0x0f;
    let bits: u16 =
        ((OBJECT_TYPE_LC as u16) << 11) | ((index as u16) << 7) | ((channels as u16) << 3);
    Some(bits.to_be_bytes())
}

/**
    Seven-byte ADTS header (no CRC) for one raw AAC-LC access unit of
    `payload_len` bytes.
*/
pub fn adts_header(sample_rate: u32, channels: u16, payload_len: usize) -> Option<[u8; 7]> {
    let index = sampling_frequency_index(sample_rate)?;
    let frame_len = payload_len + 7;
    if frame_len > 0x1fff {
        return None;
    }
    let profile = OBJECT_TYPE_LC - 1;
    let channels = (channels as u8) & 0x07;

    Some([
        0xff,
        0xf1,
        (profile << 6) | (index << 2) | (channels >> 2),
        ((channels & 0x03) << 6) | ((frame_len >> 11) as u8 & 0x03),
        ((frame_len >> 3) & 0xff) as u8,
        (((frame_len & 0x07) as u8) << 5) | 0x1f,
        0xfc,
    ])
}
