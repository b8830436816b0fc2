//! FFmpeg muxer
//!
//! Muxer implementation that pipes raw video frames into an FFmpeg encoder
//! and buffers PCM audio to a sidecar file; `finish` muxes both into the
//! segment container.

use crate::media::{
    AudioCompressionSettings, FormatDescription, MediaFormat, MediaTime, MediaType, PixelBuffer,
    PixelFormat, SampleBuffer, Transform, VideoCompressionSettings,
};
use crate::ports::{Muxer, MuxerFactory, TrackHandle, TrackSettings};
use crate::utils::error::{RecorderError, RecorderResult};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use tempfile::TempPath;

/// Longest stretch of missing frames filled by repeating the previous one
const MAX_FRAME_GAP_SECS: u64 = 2;

/// Encoder log lines kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// Opens [`FfmpegMuxer`]s
#[derive(Debug, Clone)]
pub struct FfmpegMuxerFactory {
    ffmpeg: PathBuf,
    frame_rate: u32,
}

impl FfmpegMuxerFactory {
    pub fn new(ffmpeg: impl Into<PathBuf>, frame_rate: u32) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            frame_rate: frame_rate.max(1),
        }
    }
}

impl Default for FfmpegMuxerFactory {
    fn default() -> Self {
        Self::new("ffmpeg", 30)
    }
}

impl MuxerFactory for FfmpegMuxerFactory {
    fn open(&self, path: &Path, format: MediaFormat) -> RecorderResult<Box<dyn Muxer>> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if !dir.is_dir() {
            return Err(RecorderError::MuxerStart(format!(
                "output directory {:?} does not exist",
                dir
            )));
        }

        Ok(Box::new(FfmpegMuxer {
            ffmpeg: self.ffmpeg.clone(),
            frame_rate: self.frame_rate,
            path: path.to_path_buf(),
            dir: dir.to_path_buf(),
            format,
            tracks: Vec::new(),
            video: None,
            audio: None,
            session_start: None,
            started: false,
        }))
    }
}

struct VideoTrack {
    compression: VideoCompressionSettings,
    transform: Transform,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

struct AudioTrack {
    compression: AudioCompressionSettings,
    sample_rate: u32,
    channels: u16,
}

enum Track {
    Video(VideoTrack),
    Audio(AudioTrack),
}

/// Running raw-video encoder process
struct VideoEncoder {
    process: Child,
    stdin: Option<ChildStdin>,
    /// Drains the encoder's stderr, yielding its last lines
    log: Option<JoinHandle<String>>,
    output: TempPath,
    frame_size: usize,
    frames_written: u64,
    /// Frame slots dropped when the capture clock jumped
    skipped_frames: u64,
    last_frame: Option<Vec<u8>>,
}

impl VideoEncoder {
    /// Close the encoder's input and wait for it. Returns the exit status
    /// and the tail of its log.
    fn close(&mut self) -> std::io::Result<(std::process::ExitStatus, String)> {
        drop(self.stdin.take());
        let status = self.process.wait()?;
        let log = self
            .log
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        Ok((status, log))
    }
}

/// Read `stderr` on its own thread so the encoder never blocks on a full
/// pipe. Lines go to the debug log; the last few are returned on exit.
fn drain_stderr(stderr: impl Read + Send + 'static) -> std::io::Result<JoinHandle<String>> {
    std::thread::Builder::new()
        .name("segment-recorder.encoder-log".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(stderr);
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line).trim_end().to_string();
                        tracing::debug!("ffmpeg: {}", text);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(text);
                    }
                }
            }
            Vec::from(tail).join("\n")
        })
}

/// PCM buffered until the final mux
struct AudioSidecar {
    writer: BufWriter<File>,
    path: TempPath,
    first_pts: Option<MediaTime>,
    bytes_written: u64,
}

pub struct FfmpegMuxer {
    ffmpeg: PathBuf,
    frame_rate: u32,
    path: PathBuf,
    dir: PathBuf,
    format: MediaFormat,
    tracks: Vec<Track>,
    video: Option<VideoEncoder>,
    audio: Option<AudioSidecar>,
    session_start: Option<MediaTime>,
    started: bool,
}

impl FfmpegMuxer {
    fn video_track(&self) -> Option<&VideoTrack> {
        self.tracks.iter().find_map(|t| match t {
            Track::Video(v) => Some(v),
            _ => None,
        })
    }

    fn audio_track(&self) -> Option<&AudioTrack> {
        self.tracks.iter().find_map(|t| match t {
            Track::Audio(a) => Some(a),
            _ => None,
        })
    }

    fn spawn_video_encoder(&self, track: &VideoTrack) -> RecorderResult<VideoEncoder> {
        let output = tempfile::Builder::new()
            .prefix(".segment-video-")
            .suffix(".mkv")
            .tempfile_in(&self.dir)?
            .into_temp_path();

        let args = build_video_encoder_args(track, self.frame_rate, &output);
        tracing::info!("Starting FFmpeg segment encoder: {:?}", args);

        let mut process = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RecorderError::MuxerStart(format!("Failed to start FFmpeg: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| RecorderError::MuxerStart("Failed to capture FFmpeg stdin".to_string()))?;
        let log = match process.stderr.take().map(drain_stderr).transpose() {
            Ok(log) => log,
            Err(e) => {
                let _ = process.kill();
                let _ = process.wait();
                return Err(RecorderError::MuxerStart(format!(
                    "Failed to start encoder log reader: {}",
                    e
                )));
            }
        };

        Ok(VideoEncoder {
            process,
            stdin: Some(stdin),
            log,
            output,
            frame_size: track.width as usize
                * track.height as usize
                * track.pixel_format.bytes_per_pixel(),
            frames_written: 0,
            skipped_frames: 0,
            last_frame: None,
        })
    }

    fn write_video_frame(&mut self, pts: MediaTime, data: &[u8]) -> RecorderResult<()> {
        let frame_rate = self.frame_rate;
        let start = self.session_start.unwrap_or(pts);
        let encoder = self.video.as_mut().ok_or_else(|| RecorderError::AppendFailure {
            media_type: MediaType::Video,
            reason: "no video track".to_string(),
        })?;

        if data.len() != encoder.frame_size {
            return Err(RecorderError::AppendFailure {
                media_type: MediaType::Video,
                reason: format!(
                    "frame is {} bytes, expected {}",
                    data.len(),
                    encoder.frame_size
                ),
            });
        }

        let frame_index = ((pts - start).seconds() * frame_rate as f64).round() as i64
            - encoder.skipped_frames as i64;
        let Some(mut repeats) = frame_schedule(frame_index, encoder.frames_written) else {
            // Late frame for a slot already filled
            return Ok(());
        };
        let max_repeats = MAX_FRAME_GAP_SECS * frame_rate as u64;
        if repeats > max_repeats {
            tracing::warn!(
                "Capture gap of {:.3}s at {:.3}s, filling {}s",
                repeats as f64 / frame_rate as f64,
                pts.seconds(),
                MAX_FRAME_GAP_SECS
            );
            encoder.skipped_frames += repeats - max_repeats;
            repeats = max_repeats;
        }

        let stdin = encoder.stdin.as_mut().ok_or_else(|| RecorderError::AppendFailure {
            media_type: MediaType::Video,
            reason: "encoder input closed".to_string(),
        })?;
        let write_error = |e: std::io::Error| RecorderError::AppendFailure {
            media_type: MediaType::Video,
            reason: format!("Failed to write frame: {}", e),
        };

        if let Some(previous) = encoder.last_frame.as_ref() {
            for _ in 0..repeats {
                stdin.write_all(previous).map_err(write_error)?;
            }
            encoder.frames_written += repeats;
        }
        stdin.write_all(data).map_err(write_error)?;
        encoder.frames_written += 1;

        match encoder.last_frame.as_mut() {
            Some(buffer) => buffer.copy_from_slice(data),
            None => encoder.last_frame = Some(data.to_vec()),
        }
        Ok(())
    }

    fn mux(&self, video: Option<&Path>, audio: Option<(&AudioSidecar, &AudioTrack)>) -> RecorderResult<()> {
        let rotation = self.video_track().map(|t| t.transform).unwrap_or_default();
        let audio_input = audio.map(|(sidecar, track)| {
            let offset = match (sidecar.first_pts, self.session_start) {
                (Some(first), Some(start)) => (first - start).seconds(),
                _ => 0.0,
            };
            AudioInput {
                path: sidecar.path.to_path_buf(),
                sample_rate: track.sample_rate,
                channels: track.channels,
                offset_secs: offset,
                compression: track.compression.clone(),
            }
        });

        let args = build_mux_args(video, audio_input.as_ref(), rotation, self.format, &self.path);
        tracing::info!("Muxing segment: {:?}", args);

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| RecorderError::Finish(format!("Failed to run FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecorderError::Finish(format!("FFmpeg mux failed: {}", stderr)));
        }
        Ok(())
    }
}

impl Muxer for FfmpegMuxer {
    fn add_track(
        &mut self,
        format_hint: Option<&FormatDescription>,
        settings: &TrackSettings,
    ) -> RecorderResult<TrackHandle> {
        if self.started {
            return Err(RecorderError::MuxerStart(
                "cannot add tracks after writing started".to_string(),
            ));
        }
        if self.tracks.iter().any(|t| match t {
            Track::Video(_) => settings.media_type() == MediaType::Video,
            Track::Audio(_) => settings.media_type() == MediaType::Audio,
        }) {
            return Err(RecorderError::MuxerStart(format!(
                "{} track already added",
                settings.media_type()
            )));
        }

        let track = match settings {
            TrackSettings::Video {
                compression,
                transform,
            } => {
                let (width, height, pixel_format) = match format_hint {
                    Some(FormatDescription::Video {
                        width,
                        height,
                        pixel_format,
                    }) => (*width, *height, *pixel_format),
                    _ => (compression.width, compression.height, PixelFormat::Bgra),
                };
                if width == 0 || height == 0 {
                    return Err(RecorderError::MuxerStart(
                        "video track has empty dimensions".to_string(),
                    ));
                }
                Track::Video(VideoTrack {
                    compression: compression.clone(),
                    transform: *transform,
                    width,
                    height,
                    pixel_format,
                })
            }
            TrackSettings::Audio(compression) => {
                let (sample_rate, channels) = match format_hint {
                    Some(FormatDescription::Audio {
                        sample_rate,
                        channels,
                    }) => (*sample_rate, *channels),
                    _ => (compression.sample_rate, compression.channels),
                };
                Track::Audio(AudioTrack {
                    compression: compression.clone(),
                    sample_rate,
                    channels,
                })
            }
        };

        self.tracks.push(track);
        Ok(TrackHandle(self.tracks.len() - 1))
    }

    fn start(&mut self) -> RecorderResult<()> {
        if self.started {
            return Ok(());
        }
        if self.tracks.is_empty() {
            return Err(RecorderError::MuxerStart("no tracks configured".to_string()));
        }

        if let Some(track) = self.video_track() {
            let encoder = self.spawn_video_encoder(track)?;
            self.video = Some(encoder);
        }
        if self.audio_track().is_some() {
            let file = tempfile::Builder::new()
                .prefix(".segment-audio-")
                .suffix(".pcm")
                .tempfile_in(&self.dir)?;
            let (file, path) = file.into_parts();
            self.audio = Some(AudioSidecar {
                writer: BufWriter::new(file),
                path,
                first_pts: None,
                bytes_written: 0,
            });
        }

        self.started = true;
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        if self.session_start.is_none() {
            self.session_start = Some(at);
        }
    }

    fn is_ready_for_more_media_data(&self, track: TrackHandle) -> bool {
        if !self.started {
            return false;
        }
        match self.tracks.get(track.0) {
            Some(Track::Video(_)) => self
                .video
                .as_ref()
                .map(|v| v.stdin.is_some())
                .unwrap_or(false),
            Some(Track::Audio(_)) => self.audio.is_some(),
            None => false,
        }
    }

    fn append(&mut self, track: TrackHandle, sample: &SampleBuffer) -> RecorderResult<()> {
        match self.tracks.get(track.0) {
            Some(Track::Video(_)) => self.write_video_frame(sample.pts, &sample.data),
            Some(Track::Audio(_)) => {
                let sidecar = self.audio.as_mut().ok_or_else(|| RecorderError::AppendFailure {
                    media_type: MediaType::Audio,
                    reason: "no audio track".to_string(),
                })?;
                sidecar.first_pts.get_or_insert(sample.pts);
                sidecar
                    .writer
                    .write_all(&sample.data)
                    .map_err(|e| RecorderError::AppendFailure {
                        media_type: MediaType::Audio,
                        reason: e.to_string(),
                    })?;
                sidecar.bytes_written += sample.data.len() as u64;
                Ok(())
            }
            None => Err(RecorderError::AppendFailure {
                media_type: sample.media_type(),
                reason: format!("unknown track {}", track.0),
            }),
        }
    }

    fn append_pixel_buffer(
        &mut self,
        track: TrackHandle,
        buffer: &PixelBuffer,
        pts: MediaTime,
    ) -> RecorderResult<()> {
        match self.tracks.get(track.0) {
            Some(Track::Video(_)) => self.write_video_frame(pts, &buffer.data),
            _ => Err(RecorderError::AppendFailure {
                media_type: MediaType::Video,
                reason: format!("track {} is not a video track", track.0),
            }),
        }
    }

    fn finish(&mut self) -> RecorderResult<()> {
        if !self.started {
            return Err(RecorderError::Finish("writing never started".to_string()));
        }

        let mut video_output = None;
        if let Some(mut encoder) = self.video.take() {
            let frames = encoder.frames_written;
            let (status, log) = encoder
                .close()
                .map_err(|e| RecorderError::Finish(format!("Failed to wait for FFmpeg: {}", e)))?;
            if !status.success() {
                return Err(RecorderError::Finish(format!(
                    "FFmpeg encoder exited with {}: {}",
                    status,
                    log.trim()
                )));
            }
            if frames == 0 {
                return Err(RecorderError::NoMediaData(
                    "no video frames were written".to_string(),
                ));
            }
            tracing::info!("Segment encoder finished: {} frames written", frames);
            video_output = Some(encoder.output);
        }

        let mut sidecar = self.audio.take();
        if let Some(s) = sidecar.as_mut() {
            s.writer.flush()?;
        }
        let audio = sidecar
            .as_ref()
            .filter(|s| s.bytes_written > 0)
            .zip(self.audio_track());

        if video_output.is_none() && audio.is_none() {
            return Err(RecorderError::NoMediaData("no samples were written".to_string()));
        }

        self.mux(video_output.as_deref(), audio)
    }

    fn cancel(&mut self) {
        if let Some(mut encoder) = self.video.take() {
            let _ = encoder.process.kill();
            let _ = encoder.process.wait();
        }
        self.audio = None;
    }
}

impl Drop for FfmpegMuxer {
    fn drop(&mut self) {
        if let Some(encoder) = self.video.as_mut() {
            let _ = encoder.process.kill();
        }
    }
}

/// Number of times the previous frame must be repeated before writing a
/// frame that belongs in slot `frame_index`, or `None` if that slot is
/// already filled
fn frame_schedule(frame_index: i64, frames_written: u64) -> Option<u64> {
    if frame_index < frames_written as i64 {
        None
    } else {
        Some((frame_index - frames_written as i64) as u64)
    }
}

fn build_video_encoder_args(track: &VideoTrack, frame_rate: u32, output: &Path) -> Vec<String> {
    let compression = &track.compression;
    let mut args = vec![
        "-y".to_string(),
        "-nostats".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        track.pixel_format.ffmpeg_name().to_string(),
        "-s".to_string(),
        format!("{}x{}", track.width, track.height),
        "-r".to_string(),
        frame_rate.to_string(),
        "-i".to_string(),
        "-".to_string(),
    ];

    if track.width != compression.width || track.height != compression.height {
        args.extend([
            "-vf".to_string(),
            compression
                .scaling_mode
                .ffmpeg_filter(compression.width, compression.height),
        ]);
    }

    args.extend([
        "-c:v".to_string(),
        compression.codec.ffmpeg_encoder().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ]);
    if let Some(bit_rate) = compression.average_bit_rate {
        args.extend(["-b:v".to_string(), bit_rate.to_string()]);
    }
    if let Some(interval) = compression.max_key_frame_interval {
        args.extend(["-g".to_string(), interval.to_string()]);
    }

    args.push(output.to_string_lossy().to_string());
    args
}

struct AudioInput {
    path: PathBuf,
    sample_rate: u32,
    channels: u16,
    offset_secs: f64,
    compression: AudioCompressionSettings,
}

fn build_mux_args(
    video: Option<&Path>,
    audio: Option<&AudioInput>,
    transform: Transform,
    format: MediaFormat,
    output: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-nostats".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];

    if let Some(video) = video {
        args.extend(["-i".to_string(), video.to_string_lossy().to_string()]);
    }
    if let Some(audio) = audio {
        if audio.offset_secs > 0.0 {
            args.extend(["-itsoffset".to_string(), format!("{:.6}", audio.offset_secs)]);
        } else if audio.offset_secs < 0.0 {
            args.extend(["-ss".to_string(), format!("{:.6}", -audio.offset_secs)]);
        }
        args.extend([
            "-f".to_string(),
            "s16le".to_string(),
            "-ar".to_string(),
            audio.sample_rate.to_string(),
            "-ac".to_string(),
            audio.channels.to_string(),
            "-i".to_string(),
            audio.path.to_string_lossy().to_string(),
        ]);
    }

    if video.is_some() {
        args.extend(["-map".to_string(), "0:v".to_string()]);
        args.extend(["-c:v".to_string(), "copy".to_string()]);
        let degrees = transform.quarter_turns() as u32 * 90;
        if degrees != 0 {
            args.extend(["-metadata:s:v:0".to_string(), format!("rotate={}", degrees)]);
        }
    }
    if let Some(audio) = audio {
        let index = if video.is_some() { 1 } else { 0 };
        args.extend(["-map".to_string(), format!("{}:a", index)]);
        args.extend([
            "-c:a".to_string(),
            audio.compression.codec.ffmpeg_encoder().to_string(),
            "-b:a".to_string(),
            audio.compression.bit_rate.to_string(),
            "-ar".to_string(),
            audio.compression.sample_rate.to_string(),
            "-ac".to_string(),
            audio.compression.channels.to_string(),
        ]);
        if video.is_some() {
            args.push("-shortest".to_string());
        }
    }

    args.extend(["-f".to_string(), format.ffmpeg_format().to_string()]);
    args.push(output.to_string_lossy().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{ScalingMode, VideoDimensions};
    #[cfg(unix)]
    use crate::testing::write_script;
    use std::f64::consts::FRAC_PI_2;

    fn video_track(width: u32, height: u32) -> VideoTrack {
        let mut compression = VideoCompressionSettings::for_dimensions(VideoDimensions::new(1280, 720));
        compression.average_bit_rate = Some(4_000_000);
        compression.max_key_frame_interval = Some(60);
        VideoTrack {
            compression,
            transform: Transform::IDENTITY,
            width,
            height,
            pixel_format: PixelFormat::Bgra,
        }
    }

    #[test]
    fn test_frame_schedule() {
        assert_eq!(frame_schedule(0, 0), Some(0));
        assert_eq!(frame_schedule(1, 1), Some(0));
        assert_eq!(frame_schedule(4, 1), Some(3));
        assert_eq!(frame_schedule(0, 1), None);
    }

    #[test]
    fn test_encoder_args_without_scaling() {
        let args = build_video_encoder_args(&video_track(1280, 720), 30, Path::new("/tmp/v.mkv"));
        assert!(args.windows(2).any(|w| w[0] == "-s" && w[1] == "1280x720"));
        assert!(args.windows(2).any(|w| w[0] == "-b:v" && w[1] == "4000000"));
        assert!(args.windows(2).any(|w| w[0] == "-g" && w[1] == "60"));
        assert!(!args.contains(&"-vf".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/v.mkv"));
    }

    #[test]
    fn test_encoder_args_scale_with_aspect_fill() {
        let mut track = video_track(1920, 1080);
        track.compression.scaling_mode = ScalingMode::ResizeAspectFill;
        let args = build_video_encoder_args(&track, 30, Path::new("/tmp/v.mkv"));
        let filter = args
            .windows(2)
            .find(|w| w[0] == "-vf")
            .map(|w| w[1].clone())
            .unwrap();
        assert!(filter.contains("force_original_aspect_ratio=increase"));
        assert!(filter.contains("crop=1280:720"));
    }

    #[test]
    fn test_mux_args_video_and_audio() {
        let audio = AudioInput {
            path: PathBuf::from("/tmp/a.pcm"),
            sample_rate: 48000,
            channels: 2,
            offset_secs: 0.25,
            compression: AudioCompressionSettings::default(),
        };
        let args = build_mux_args(
            Some(Path::new("/tmp/v.mkv")),
            Some(&audio),
            Transform::rotation(FRAC_PI_2),
            MediaFormat::M4v,
            Path::new("/tmp/out.m4v"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-itsoffset 0.250000 -f s16le -ar 48000 -ac 2 -i /tmp/a.pcm"));
        assert!(joined.contains("-map 0:v -c:v copy -metadata:s:v:0 rotate=90"));
        assert!(joined.contains("-map 1:a -c:a aac -b:a 128000 -ar 44100 -ac 1"));
        assert!(joined.ends_with("-f ipod /tmp/out.m4v"));
    }

    #[test]
    fn test_mux_args_audio_only_trims_early_audio() {
        let audio = AudioInput {
            path: PathBuf::from("/tmp/a.pcm"),
            sample_rate: 44100,
            channels: 1,
            offset_secs: -0.1,
            compression: AudioCompressionSettings::default(),
        };
        let args = build_mux_args(
            None,
            Some(&audio),
            Transform::IDENTITY,
            MediaFormat::Mov,
            Path::new("/tmp/out.mov"),
        );
        let joined = args.join(" ");
        assert!(joined.starts_with("-y -nostats -loglevel error -ss 0.100000"));
        assert!(joined.contains("-map 0:a"));
        assert!(!joined.contains("-shortest"));
    }

    #[test]
    fn test_open_requires_existing_directory() {
        let factory = FfmpegMuxerFactory::default();
        let result = factory.open(Path::new("/definitely/missing/dir/a.mov"), MediaFormat::Mov);
        assert!(matches!(result, Err(RecorderError::MuxerStart(_))));
    }

    /// Stands in for ffmpeg: chatty on stderr, consumes its input and
    /// creates the file named by its last argument
    #[cfg(unix)]
    const NOISY_FFMPEG: &str = r#"head -c 200000 /dev/zero | tr '\0' 'x' >&2
cat > /dev/null
for last; do :; done
: > "$last""#;

    const WIDTH: u32 = 64;
    const HEIGHT: u32 = 36;

    fn muxer(ffmpeg: &Path, dir: &Path) -> FfmpegMuxer {
        FfmpegMuxer {
            ffmpeg: ffmpeg.to_path_buf(),
            frame_rate: 30,
            path: dir.join("segment.mov"),
            dir: dir.to_path_buf(),
            format: MediaFormat::Mov,
            tracks: Vec::new(),
            video: None,
            audio: None,
            session_start: None,
            started: false,
        }
    }

    fn start_with_tracks(muxer: &mut FfmpegMuxer) -> (TrackHandle, TrackHandle) {
        let hint = FormatDescription::Video {
            width: WIDTH,
            height: HEIGHT,
            pixel_format: PixelFormat::Bgra,
        };
        let video = muxer
            .add_track(
                Some(&hint),
                &TrackSettings::Video {
                    compression: VideoCompressionSettings::for_dimensions(VideoDimensions::new(
                        WIDTH, HEIGHT,
                    )),
                    transform: Transform::IDENTITY,
                },
            )
            .unwrap();
        let audio = muxer
            .add_track(None, &TrackSettings::Audio(AudioCompressionSettings::default()))
            .unwrap();
        muxer.start().unwrap();
        muxer.start_session(MediaTime::ZERO);
        (video, audio)
    }

    fn frame(value: i64, timescale: i32) -> SampleBuffer {
        SampleBuffer::video(
            MediaTime::new(value, timescale),
            MediaTime::new(1, 30),
            WIDTH,
            HEIGHT,
            PixelFormat::Bgra,
            vec![0; (WIDTH * HEIGHT * 4) as usize],
        )
    }

    #[cfg(unix)]
    #[test]
    fn test_noisy_encoder_does_not_stall() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(dir.path(), "ffmpeg", NOISY_FFMPEG);
        let mut muxer = muxer(&ffmpeg, dir.path());
        let output = muxer.path.clone();

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let (video, audio) = start_with_tracks(&mut muxer);
            let result = (0..100)
                .try_for_each(|i| {
                    muxer.append(video, &frame(i, 30))?;
                    let pcm = SampleBuffer::audio(MediaTime::new(i * 1470, 44_100), 44_100, 1, vec![0; 2940]);
                    muxer.append(audio, &pcm)
                })
                .and_then(|()| muxer.finish());
            let _ = tx.send(result);
        });

        let result = rx
            .recv_timeout(std::time::Duration::from_secs(30))
            .expect("encoder stalled");
        assert!(result.is_ok(), "{:?}", result);
        assert!(output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_encoder_failure_reports_its_log() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(
            dir.path(),
            "ffmpeg",
            "echo 'Unknown encoder libx264' >&2\ncat > /dev/null\nexit 1",
        );
        let mut muxer = muxer(&ffmpeg, dir.path());
        let (video, _) = start_with_tracks(&mut muxer);
        let _ = muxer.append(video, &frame(0, 30));

        match muxer.finish() {
            Err(RecorderError::Finish(message)) => {
                assert!(message.contains("Unknown encoder libx264"), "{}", message)
            }
            other => panic!("expected finish error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_gap_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(dir.path(), "ffmpeg", NOISY_FFMPEG);
        let mut muxer = muxer(&ffmpeg, dir.path());
        let (video, _) = start_with_tracks(&mut muxer);

        muxer.append(video, &frame(0, 30)).unwrap();
        // An hour-long jump only fills two seconds
        muxer.append(video, &frame(108_000, 30)).unwrap();
        muxer.append(video, &frame(108_001, 30)).unwrap();

        let encoder = muxer.video.as_ref().unwrap();
        assert_eq!(encoder.frames_written, 63);
        assert_eq!(encoder.skipped_frames, 107_939);
        muxer.finish().unwrap();
    }

    #[test]
    fn test_track_configuration_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FfmpegMuxerFactory::default();
        let mut muxer = factory
            .open(&dir.path().join("a.mov"), MediaFormat::Mov)
            .unwrap();
        let settings = TrackSettings::Audio(AudioCompressionSettings::default());
        let handle = muxer.add_track(None, &settings).unwrap();
        assert_eq!(handle, TrackHandle(0));
        assert!(muxer.add_track(None, &settings).is_err());
        assert!(!muxer.is_ready_for_more_media_data(handle));
    }
}
