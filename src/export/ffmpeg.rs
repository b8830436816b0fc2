//! FFmpeg transcoder and ffprobe probe
//!
//! Renders compositions into a single file with an FFmpeg `filter_complex`
//! (trim/concat for cuts, xfade/acrossfade for transitions) and reads
//! segment layout with ffprobe.

use super::composition::{Composition, TrackSegment};
use super::transition::{VideoComposition, COMPOSITION_FRAME_RATE};
use crate::media::{MediaFormat, MediaTime, MediaType, Size, TimeRange, Transform};
use crate::ports::{
    AssetInfo, AudioTrackInfo, ExportCompletion, ExportRequest, ExportStatus, MediaProbe,
    Transcoder, VideoTrackInfo,
};
use crate::utils::error::{RecorderError, RecorderResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Transcoder that runs one FFmpeg process per export
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    cancel_flag: Arc<AtomicBool>,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop the running export, or the next one if none is running. Its
    /// completion reports `Cancelled`.
    pub fn cancel(&self) {
        tracing::info!("Cancelling export");
        self.cancel_flag.store(true, Ordering::Relaxed);
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Transcoder for FfmpegTranscoder {
    fn export(&self, request: ExportRequest, completion: ExportCompletion) -> RecorderResult<()> {
        let args = build_export_args(&request)?;

        tracing::info!("Starting FFmpeg export: {:?}", args);

        let mut process = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RecorderError::ExportSession(format!("Failed to start FFmpeg: {}", e)))?;

        let cancel_flag = self.cancel_flag.clone();
        let output = request.output;
        std::thread::Builder::new()
            .name("segment-recorder.export".to_string())
            .spawn(move || {
                let status = wait_for_export(&mut process, &cancel_flag, &output);
                // Cancels issued before or during this export are consumed
                cancel_flag.store(false, Ordering::Relaxed);
                completion(status);
            })
            .map_err(|e| {
                RecorderError::ExportSession(format!("Failed to start export waiter: {}", e))
            })?;

        Ok(())
    }
}

fn wait_for_export(process: &mut Child, cancel_flag: &AtomicBool, output: &Path) -> ExportStatus {
    loop {
        if cancel_flag.load(Ordering::Relaxed) {
            let _ = process.kill();
            let _ = process.wait();
            let _ = std::fs::remove_file(output);
            return ExportStatus::Cancelled;
        }

        match process.try_wait() {
            Ok(Some(status)) if status.success() => {
                tracing::info!("Export completed: {:?}", output);
                return ExportStatus::Completed;
            }
            Ok(Some(status)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = process.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return ExportStatus::Failed(RecorderError::ExportSession(format!(
                    "FFmpeg exited with {}: {}",
                    status,
                    stderr.trim()
                )));
            }
            Ok(None) => std::thread::sleep(EXPORT_POLL_INTERVAL),
            Err(e) => return ExportStatus::Failed(RecorderError::Io(e)),
        }
    }
}

/// Input files of an export, in `-i` order
#[derive(Default)]
struct InputTable {
    paths: Vec<PathBuf>,
}

impl InputTable {
    fn index_of(&mut self, path: &Path) -> usize {
        match self.paths.iter().position(|p| p == path) {
            Some(index) => index,
            None => {
                self.paths.push(path.to_path_buf());
                self.paths.len() - 1
            }
        }
    }
}

/// Filter graph plus the labels of its outputs
struct FilterGraph {
    filters: Vec<String>,
    video: Option<String>,
    audio: Option<String>,
}

/// Build the FFmpeg command line for an export request
pub fn build_export_args(request: &ExportRequest) -> RecorderResult<Vec<String>> {
    let mut inputs = InputTable::default();

    let graph = match &request.video_composition {
        Some(video_composition) if has_transitions(video_composition) => {
            build_transition_graph(&request.composition, video_composition, &mut inputs)
        }
        Some(video_composition) => build_sequence_graph(
            &request.composition,
            Some(video_composition.render_size),
            &mut inputs,
        ),
        None => build_sequence_graph(&request.composition, None, &mut inputs),
    };

    if graph.video.is_none() && graph.audio.is_none() {
        return Err(RecorderError::NoMediaData(
            "composition has no media to export".to_string(),
        ));
    }

    let mut args = vec![
        "-y".to_string(),
        "-nostats".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];
    for path in &inputs.paths {
        args.extend([
            "-noautorotate".to_string(),
            "-i".to_string(),
            path.to_string_lossy().to_string(),
        ]);
    }

    args.extend(["-filter_complex".to_string(), graph.filters.join(";")]);

    let quality = request.quality;
    if let Some(video) = &graph.video {
        args.extend(["-map".to_string(), format!("[{}]", video)]);
        args.extend([
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            quality.h264_preset().to_string(),
            "-crf".to_string(),
            quality.crf().to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]);
    }
    if let Some(audio) = &graph.audio {
        args.extend(["-map".to_string(), format!("[{}]", audio)]);
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            quality.audio_bit_rate().to_string(),
        ]);
    }
    if matches!(request.format, MediaFormat::Mov | MediaFormat::Mp4) {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }

    args.extend(["-f".to_string(), request.format.ffmpeg_format().to_string()]);
    args.push(request.output.to_string_lossy().to_string());
    Ok(args)
}

fn has_transitions(video_composition: &VideoComposition) -> bool {
    video_composition
        .instructions
        .iter()
        .any(|i| i.is_transition() && i.time_range.duration.is_positive())
}

/// Segments of every track of `media_type`, in timeline order, with the
/// transform of the track they sit on
fn timeline(composition: &Composition, media_type: MediaType) -> Vec<(&TrackSegment, Transform)> {
    let mut segments: Vec<_> = composition
        .tracks_of(media_type)
        .flat_map(|track| track.segments.iter().map(move |s| (s, track.preferred_transform)))
        .collect();
    segments.sort_by(|a, b| a.0.target_start.cmp(&b.0.target_start));
    segments
}

fn even(value: f64) -> u32 {
    ((value.round().max(2.0) as u32) / 2) * 2
}

fn secs(time: MediaTime) -> String {
    format!("{:.6}", time.seconds())
}

/// Filters turning a track's frames upright
fn rotation_filter(transform: Transform) -> &'static str {
    match transform.quarter_turns() {
        1 => ",transpose=clock",
        2 => ",hflip,vflip",
        3 => ",transpose=cclock",
        _ => "",
    }
}

fn video_source_filter(input: usize, range: TimeRange, transform: Transform, size: (u32, u32), label: &str) -> String {
    let (w, h) = size;
    format!(
        "[{input}:v]trim=start={start}:end={end},setpts=PTS-STARTPTS{rotate},\
         scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black,\
         fps={fps},setsar=1,format=yuv420p,settb=AVTB[{label}]",
        input = input,
        start = secs(range.start),
        end = secs(range.end()),
        rotate = rotation_filter(transform),
        w = w,
        h = h,
        fps = COMPOSITION_FRAME_RATE,
        label = label
    )
}

fn audio_source_filter(input: usize, range: TimeRange, label: &str) -> String {
    format!(
        "[{}:a]atrim=start={}:end={},asetpts=PTS-STARTPTS,aresample={},aformat=channel_layouts=stereo[{}]",
        input,
        secs(range.start),
        secs(range.end()),
        AUDIO_SAMPLE_RATE,
        label
    )
}

fn silence_filter(duration: MediaTime, label: &str) -> String {
    format!(
        "anullsrc=r={}:cl=stereo,atrim=duration={}[{}]",
        AUDIO_SAMPLE_RATE,
        secs(duration),
        label
    )
}

fn black_filter(duration: MediaTime, size: (u32, u32), label: &str) -> String {
    format!(
        "color=c=black:s={}x{}:r={}:d={},setsar=1,format=yuv420p,settb=AVTB[{}]",
        size.0,
        size.1,
        COMPOSITION_FRAME_RATE,
        secs(duration),
        label
    )
}

fn concat_filter(labels: &[String], media_type: MediaType, output: &str) -> String {
    let inputs: String = labels.iter().map(|l| format!("[{}]", l)).collect();
    let (v, a) = match media_type {
        MediaType::Video => (1, 0),
        MediaType::Audio => (0, 1),
    };
    format!("{}concat=n={}:v={}:a={}[{}]", inputs, labels.len(), v, a, output)
}

/// Segments played back to back, with gaps filled by black or silence
fn build_sequence_graph(
    composition: &Composition,
    render_size: Option<Size>,
    inputs: &mut InputTable,
) -> FilterGraph {
    let mut filters = Vec::new();
    let size = render_size
        .or_else(|| composition.natural_size())
        .map(|s| (even(s.width), even(s.height)));

    let video_segments = timeline(composition, MediaType::Video);
    let video = match size {
        Some(size) if !video_segments.is_empty() => {
            let mut labels = Vec::new();
            let mut cursor = MediaTime::ZERO;
            for (segment, transform) in video_segments {
                if segment.target_start > cursor {
                    let label = format!("v{}", labels.len());
                    filters.push(black_filter(segment.target_start - cursor, size, &label));
                    labels.push(label);
                }
                let label = format!("v{}", labels.len());
                let input = inputs.index_of(&segment.source);
                filters.push(video_source_filter(input, segment.source_range, transform, size, &label));
                labels.push(label);
                cursor = segment.target_range().end();
            }
            filters.push(concat_filter(&labels, MediaType::Video, "vout"));
            Some("vout".to_string())
        }
        _ => None,
    };

    let audio_segments = timeline(composition, MediaType::Audio);
    let audio = if audio_segments.is_empty() {
        None
    } else {
        let mut labels = Vec::new();
        let mut cursor = MediaTime::ZERO;
        for (segment, _) in audio_segments {
            if segment.target_start > cursor {
                let label = format!("a{}", labels.len());
                filters.push(silence_filter(segment.target_start - cursor, &label));
                labels.push(label);
            }
            let label = format!("a{}", labels.len());
            let input = inputs.index_of(&segment.source);
            filters.push(audio_source_filter(input, segment.source_range, &label));
            labels.push(label);
            cursor = segment.target_range().end();
        }
        filters.push(concat_filter(&labels, MediaType::Audio, "aout"));
        Some("aout".to_string())
    };

    FilterGraph {
        filters,
        video,
        audio,
    }
}

/// Segments chained with cross-fades at the composition's transition ranges
fn build_transition_graph(
    composition: &Composition,
    video_composition: &VideoComposition,
    inputs: &mut InputTable,
) -> FilterGraph {
    let mut filters = Vec::new();
    let size = (
        even(video_composition.render_size.width),
        even(video_composition.render_size.height),
    );

    let layer_transforms: Vec<Transform> = video_composition
        .instructions
        .iter()
        .filter(|i| !i.is_transition())
        .filter_map(|i| i.layers.first().map(|l| l.transform))
        .collect();
    let transitions: Vec<TimeRange> = video_composition
        .instructions
        .iter()
        .filter(|i| i.is_transition())
        .map(|i| i.time_range)
        .collect();

    let video_segments = timeline(composition, MediaType::Video);
    let audio_segments = timeline(composition, MediaType::Audio);

    let mut video_label = String::new();
    let mut audio_label: Option<String> = None;
    let has_audio = !audio_segments.is_empty();

    for (k, (segment, track_transform)) in video_segments.iter().enumerate() {
        let input = inputs.index_of(&segment.source);
        let transform = layer_transforms.get(k).copied().unwrap_or(*track_transform);
        let label = format!("v{}", k);
        filters.push(video_source_filter(input, segment.source_range, transform, size, &label));

        let audio = format!("a{}", k);
        if has_audio {
            match audio_segments.iter().find(|(a, _)| a.source == segment.source) {
                Some((a, _)) => {
                    let input = inputs.index_of(&a.source);
                    filters.push(audio_source_filter(input, a.source_range, &audio));
                }
                None => filters.push(silence_filter(segment.source_range.duration, &audio)),
            }
        }

        if k == 0 {
            video_label = label;
            if has_audio {
                audio_label = Some(audio);
            }
            continue;
        }

        let transition = transitions
            .get(k - 1)
            .copied()
            .unwrap_or_else(|| TimeRange::new(segment.target_start, MediaTime::ZERO));

        let faded = format!("x{}", k);
        filters.push(format!(
            "[{}][{}]xfade=transition=fade:duration={}:offset={}[{}]",
            video_label,
            label,
            secs(transition.duration),
            secs(transition.start),
            faded
        ));
        video_label = faded;

        if let Some(previous) = audio_label.take() {
            let mixed = format!("ax{}", k);
            filters.push(format!(
                "[{}][{}]acrossfade=d={}:c1=tri:c2=tri[{}]",
                previous,
                audio,
                secs(transition.duration),
                mixed
            ));
            audio_label = Some(mixed);
        }
    }

    FilterGraph {
        filters,
        video: if video_segments.is_empty() {
            None
        } else {
            Some(video_label)
        },
        audio: audio_label,
    }
}

/// Media probe backed by ffprobe
pub struct FfprobeProbe {
    ffprobe: PathBuf,
}

impl FfprobeProbe {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl MediaProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> RecorderResult<AssetInfo> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()
            .map_err(|e| RecorderError::ExportSession(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecorderError::NoMediaData(format!(
                "ffprobe failed for {:?}: {}",
                path,
                stderr.trim()
            )));
        }

        parse_probe_output(path, &output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl ProbeStream {
    fn duration(&self) -> Option<MediaTime> {
        parse_seconds(self.duration.as_deref())
    }

    /// Clockwise display rotation in degrees
    fn rotation_degrees(&self) -> f64 {
        if let Some(rotate) = self.tags.get("rotate").and_then(|r| r.parse::<f64>().ok()) {
            return rotate;
        }
        // Display matrix rotation is counter-clockwise
        self.side_data_list
            .iter()
            .find_map(|s| s.rotation)
            .map(|r| -r)
            .unwrap_or(0.0)
    }
}

fn parse_seconds(value: Option<&str>) -> Option<MediaTime> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| MediaTime::from_seconds(v, 600))
}

/// Parse `ffprobe -print_format json` output for `path`
pub fn parse_probe_output(path: &Path, json: &[u8]) -> RecorderResult<AssetInfo> {
    let probe: ProbeOutput = serde_json::from_slice(json)?;
    let format_duration = probe.format.as_ref().and_then(|f| parse_seconds(f.duration.as_deref()));

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    if video_stream.is_none() && audio_stream.is_none() {
        return Err(RecorderError::NoMediaData(format!(
            "{:?} has no audio or video streams",
            path
        )));
    }

    let video = video_stream.map(|s| {
        let turns = (s.rotation_degrees() / 90.0).round() as i64;
        VideoTrackInfo {
            natural_size: Size::new(s.width.unwrap_or(0) as f64, s.height.unwrap_or(0) as f64),
            preferred_transform: match turns.rem_euclid(4) {
                0 => Transform::IDENTITY,
                t => Transform::rotation(t as f64 * std::f64::consts::FRAC_PI_2),
            },
            time_range: TimeRange::new(
                MediaTime::ZERO,
                s.duration().or(format_duration).unwrap_or(MediaTime::ZERO),
            ),
        }
    });
    let audio = audio_stream.map(|s| AudioTrackInfo {
        time_range: TimeRange::new(
            MediaTime::ZERO,
            s.duration().or(format_duration).unwrap_or(MediaTime::ZERO),
        ),
    });

    let duration = format_duration.unwrap_or_else(|| {
        video
            .iter()
            .map(|v| v.time_range.duration)
            .chain(audio.iter().map(|a| a.time_range.duration))
            .max()
            .unwrap_or(MediaTime::ZERO)
    });

    Ok(AssetInfo {
        path: path.to_path_buf(),
        duration,
        video,
        audio,
    })
}
