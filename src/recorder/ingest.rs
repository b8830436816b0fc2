//! Sample ingestion
//!
//! Tracks the latest format description per media type. The first sample
//! seen after a reset or a format change only teaches the new format and
//! is never recorded.

use crate::media::{FormatDescription, MediaType};

#[derive(Debug, Default, Clone)]
pub struct FormatCache {
    video: Option<FormatDescription>,
    audio: Option<FormatDescription>,
}

impl FormatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `format` as the latest for its media type. Returns `false`
    /// when the sample carrying it must be skipped.
    pub fn observe(&mut self, format: &FormatDescription) -> bool {
        let slot = match format.media_type() {
            MediaType::Video => &mut self.video,
            MediaType::Audio => &mut self.audio,
        };
        let known = slot.as_ref() == Some(format);
        if !known {
            tracing::debug!("New {} format {:?}, skipping first sample", format.media_type(), format);
        }
        *slot = Some(*format);
        known
    }

    /// Forget every cached format, e.g. after the capture device changed
    pub fn reset(&mut self) {
        self.video = None;
        self.audio = None;
    }

    pub fn video(&self) -> Option<FormatDescription> {
        self.video
    }

    pub fn audio(&self) -> Option<FormatDescription> {
        self.audio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::PixelFormat;

    fn video(width: u32, height: u32) -> FormatDescription {
        FormatDescription::Video {
            width,
            height,
            pixel_format: PixelFormat::Bgra,
        }
    }

    const AUDIO: FormatDescription = FormatDescription::Audio {
        sample_rate: 44_100,
        channels: 1,
    };

    #[test]
    fn test_first_sample_per_type_is_skipped() {
        let mut cache = FormatCache::new();
        assert!(!cache.observe(&video(640, 480)));
        assert!(cache.observe(&video(640, 480)));
        assert!(!cache.observe(&AUDIO));
        assert!(cache.observe(&AUDIO));
        assert_eq!(cache.video(), Some(video(640, 480)));
    }

    #[test]
    fn test_format_change_skips_once() {
        let mut cache = FormatCache::new();
        cache.observe(&video(640, 480));
        assert!(!cache.observe(&video(480, 640)));
        assert!(cache.observe(&video(480, 640)));
    }

    #[test]
    fn test_reset_forgets_formats() {
        let mut cache = FormatCache::new();
        cache.observe(&video(640, 480));
        cache.observe(&AUDIO);
        cache.reset();
        assert!(cache.video().is_none());
        assert!(cache.audio().is_none());
        assert!(!cache.observe(&AUDIO));
    }
}
