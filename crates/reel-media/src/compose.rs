//! Scene composition: per-scene mux and final concatenation.
//!
//! Concatenation first tries the concat demuxer with stream copy. When the
//! probed inputs differ in codec parameters, or the copy fails, inputs are
//! normalised to the first scene's geometry and re-encoded with libx264/aac.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_media, MediaInfo};

const FALLBACK_WIDTH: u32 = 1920;
const FALLBACK_HEIGHT: u32 = 1080;
const TARGET_SAMPLE_RATE: u32 = 48_000;

/// Result of a successful concatenation.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeOutput {
    pub duration_secs: f64,
    /// True when the stream-copy path produced the output.
    pub lossless: bool,
}

/// Media operations used by the pipeline.
#[async_trait]
pub trait MediaComposer: Send + Sync {
    /// Concatenate `inputs` in order into `output`. Scratch files go in `work_dir`.
    async fn concat(&self, inputs: &[PathBuf], output: &Path, work_dir: &Path) -> MediaResult<ComposeOutput>;

    /// Combine a silent video with a narration track.
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<()>;
}

/// FFmpeg-backed composer. Every call is bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct FfmpegComposer {
    timeout: Duration,
}

impl FfmpegComposer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn concat_inner(&self, inputs: &[PathBuf], output: &Path, work_dir: &Path) -> MediaResult<ComposeOutput> {
        let mut infos = Vec::with_capacity(inputs.len());
        for input in inputs {
            infos.push(probe_media(input).await?);
        }

        let runner = FfmpegRunner::new();
        let lossless = streams_match(&infos);

        if lossless {
            let manifest = work_dir.join("concat.txt");
            tokio::fs::write(&manifest, concat_manifest(inputs)).await?;

            let copy = FfmpegCommand::new(output)
                .input_with(["-f", "concat", "-safe", "0"], &manifest)
                .output_args(["-c", "copy"])
                .faststart();

            match runner.run(&copy).await {
                Ok(()) => return Ok(ComposeOutput {
                    duration_secs: probe_media(output).await?.duration,
                    lossless: true,
                }),
                Err(e @ MediaError::FfmpegFailed { .. }) => {
                    warn!(error = %e.detail(), "Stream-copy concat failed, re-encoding");
                    let _ = tokio::fs::remove_file(output).await;
                }
                Err(e) => return Err(e),
            }
        }

        let cmd = reencode_command(inputs, &infos, output)?;
        runner.run(&cmd).await?;

        Ok(ComposeOutput {
            duration_secs: probe_media(output).await?.duration,
            lossless: false,
        })
    }
}

#[async_trait]
impl MediaComposer for FfmpegComposer {
    async fn concat(&self, inputs: &[PathBuf], output: &Path, work_dir: &Path) -> MediaResult<ComposeOutput> {
        if inputs.is_empty() {
            return Err(MediaError::NoInputs);
        }

        // Dropping the inner future kills any running child (kill_on_drop).
        let result = tokio::time::timeout(self.timeout, self.concat_inner(inputs, output, work_dir))
            .await
            .map_err(|_| MediaError::Timeout(self.timeout.as_secs()))??;

        info!(
            inputs = inputs.len(),
            duration_secs = result.duration_secs,
            lossless = result.lossless,
            "Concatenated scenes"
        );
        Ok(result)
    }

    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(output)
            .input(video)
            .input(audio)
            .map("0:v:0")
            .map("1:a:0")
            .video_codec("copy")
            .audio_codec("aac")
            .audio_bitrate("192k")
            // Pad narration with silence so the video length wins.
            .output_args(["-af", "apad", "-shortest"])
            .faststart();

        FfmpegRunner::new().with_timeout(self.timeout).run(&cmd).await
    }
}

/// True when every input can be stream-copied after the first.
pub fn streams_match(infos: &[MediaInfo]) -> bool {
    match infos.split_first() {
        Some((first, rest)) => first.video.is_some() && rest.iter().all(|i| first.concat_compatible(i)),
        None => false,
    }
}

/// Concat demuxer manifest. Single quotes in paths are escaped as `'\''`.
pub fn concat_manifest(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', r"'\''")))
        .collect()
}

/// Filter graph scaling every input to a common geometry and frame rate, with
/// silence substituted for missing audio.
pub fn reencode_filter(infos: &[MediaInfo]) -> String {
    let (width, height, fps) = infos
        .iter()
        .find_map(|i| i.video.as_ref())
        .map(|v| (v.width.max(2), v.height.max(2), v.fps.round().max(1.0)))
        .unwrap_or((FALLBACK_WIDTH, FALLBACK_HEIGHT, 30.0));

    let mut graph = String::new();
    let mut pairs = String::new();
    for (i, info) in infos.iter().enumerate() {
        graph.push_str(&format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p[v{i}];",
            i = i,
            w = width,
            h = height,
            fps = fps
        ));
        if info.audio.is_some() {
            graph.push_str(&format!(
                "[{i}:a]aresample={sr},aformat=channel_layouts=stereo[a{i}];",
                i = i,
                sr = TARGET_SAMPLE_RATE
            ));
        } else {
            graph.push_str(&format!(
                "anullsrc=channel_layout=stereo:sample_rate={sr},atrim=duration={d:.3}[a{i}];",
                i = i,
                sr = TARGET_SAMPLE_RATE,
                d = info.duration
            ));
        }
        pairs.push_str(&format!("[v{i}][a{i}]", i = i));
    }
    graph.push_str(&format!("{}concat=n={}:v=1:a=1[outv][outa]", pairs, infos.len()));
    graph
}

fn reencode_command(inputs: &[PathBuf], infos: &[MediaInfo], output: &Path) -> MediaResult<FfmpegCommand> {
    if infos.iter().any(|i| i.video.is_none()) {
        return Err(MediaError::invalid_media("every scene needs a video stream"));
    }

    let cmd = inputs
        .iter()
        .fold(FfmpegCommand::new(output), |cmd, input| cmd.input(input))
        .filter_complex(reencode_filter(infos))
        .map("[outv]")
        .map("[outa]")
        .video_codec("libx264")
        .preset("veryfast")
        .crf(20)
        .audio_codec("aac")
        .audio_bitrate("192k")
        .faststart();
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{check_ffmpeg, check_ffprobe};
    use crate::probe::{AudioStream, VideoStream};

    fn info(width: u32, audio: bool) -> MediaInfo {
        MediaInfo {
            duration: 4.0,
            video: Some(VideoStream {
                codec: "h264".into(),
                width,
                height: 720,
                fps: 30.0,
                pix_fmt: "yuv420p".into(),
            }),
            audio: audio.then(|| AudioStream {
                codec: "aac".into(),
                sample_rate: 48_000,
                channels: 2,
            }),
        }
    }

    #[test]
    fn test_manifest_escapes_quotes() {
        let manifest = concat_manifest(&[PathBuf::from("/tmp/a.mp4"), PathBuf::from("/tmp/it's.mp4")]);
        assert_eq!(manifest, "file '/tmp/a.mp4'\nfile '/tmp/it'\\''s.mp4'\n");
    }

    #[test]
    fn test_streams_match() {
        assert!(streams_match(&[info(1280, true), info(1280, true)]));
        assert!(!streams_match(&[info(1280, true), info(1920, true)]));
        assert!(!streams_match(&[info(1280, true), info(1280, false)]));
        assert!(!streams_match(&[]));
    }

    #[test]
    fn test_reencode_filter_fills_missing_audio() {
        let graph = reencode_filter(&[info(1280, true), info(1920, false)]);
        assert!(graph.contains("[0:a]aresample=48000"));
        assert!(graph.contains("anullsrc=channel_layout=stereo:sample_rate=48000,atrim=duration=4.000[a1]"));
        assert!(graph.contains("scale=1280:720"));
        assert!(graph.ends_with("[v0][a0][v1][a1]concat=n=2:v=1:a=1[outv][outa]"));
    }

    #[tokio::test]
    async fn test_concat_rejects_empty_input() {
        let composer = FfmpegComposer::new(Duration::from_secs(5));
        let dir = tempfile::tempdir().unwrap();
        let result = composer.concat(&[], &dir.path().join("out.mp4"), dir.path()).await;
        assert!(matches!(result, Err(MediaError::NoInputs)));
    }

    async fn test_clip(dir: &Path, name: &str, size: &str) -> PathBuf {
        let path = dir.join(name);
        let cmd = FfmpegCommand::new(&path)
            .input_with(["-f", "lavfi"], format!("testsrc=duration=1:size={}:rate=25", size))
            .input_with(["-f", "lavfi"], "sine=frequency=440:duration=1")
            .video_codec("libx264")
            .output_args(["-pix_fmt", "yuv420p"])
            .audio_codec("aac")
            .output_arg("-shortest");
        FfmpegRunner::new().run(&cmd).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_concat_end_to_end() {
        if check_ffmpeg().is_err() || check_ffprobe().is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let a = test_clip(dir.path(), "a.mp4", "320x240").await;
        let b = test_clip(dir.path(), "b.mp4", "320x240").await;
        let c = test_clip(dir.path(), "c.mp4", "640x480").await;
        let composer = FfmpegComposer::new(Duration::from_secs(60));

        let same = composer
            .concat(&[a.clone(), b], &dir.path().join("same.mp4"), dir.path())
            .await
            .unwrap();
        assert!(same.lossless);
        assert!((same.duration_secs - 2.0).abs() < 0.3);

        let mixed = composer
            .concat(&[a, c], &dir.path().join("mixed.mp4"), dir.path())
            .await
            .unwrap();
        assert!(!mixed.lossless);
    }
}
