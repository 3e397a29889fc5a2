//! Hardware-accelerated MJPEG decoder discovery.
//!
//! Looks for FFmpeg's hardware MJPEG decoders (CUDA/QSV) and falls back to the
//! software `mjpeg` decoder when none is available.

const HW_MJPEG_DECODERS: &[&str] = &["mjpeg_cuvid", "mjpeg_qsv"];

/// Try to find a hardware-accelerated MJPEG decoder.
/// Returns the first available one, or None if none is found.
pub fn find_hw_decoder() -> Option<ffmpeg_next::Codec> {
    for name in HW_MJPEG_DECODERS {
        if let Some(codec) = ffmpeg_next::decoder::find_by_name(name) {
            log::info!("found hardware decoder: {}", name);
            return Some(codec);
        }
    }
    None
}

/// The software `mjpeg` decoder, used when no hardware decoder opens.
pub fn find_sw_decoder() -> anyhow::Result<ffmpeg_next::Codec> {
    ffmpeg_next::decoder::find(ffmpeg_next::codec::Id::MJPEG)
        .ok_or_else(|| anyhow::anyhow!("no MJPEG decoder available"))
}
