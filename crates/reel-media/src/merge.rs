//! Merging rendered clips into one artifact with ffmpeg filter graphs.

use std::fmt::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use reel_models::{MergeConfig, MergeMode, TransitionKind};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::get_duration;

/// One rendered clip handed to the merger.
#[derive(Debug, Clone)]
pub struct MergeInput {
    pub path: PathBuf,
    /// Duration the clip was rendered for
    pub nominal_duration_secs: f64,
}

/// Everything needed to merge a list of clips.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub inputs: Vec<MergeInput>,
    pub output: PathBuf,
    pub config: MergeConfig,
}

/// Post-processing stage that combines produced clips.
#[async_trait]
pub trait ClipMerger: Send + Sync {
    /// Merge `request.inputs` into `request.output`.
    async fn merge(
        &self,
        request: &MergeRequest,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<PathBuf>;
}

/// Merger backed by the ffmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegMerger {
    ffmpeg: String,
    ffprobe: String,
    crf: u8,
    preset: String,
}

impl Default for FfmpegMerger {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegMerger {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            crf: 20,
            preset: "veryfast".to_string(),
        }
    }

    /// Clip durations for transition offsets: probed, or nominal on failure.
    async fn clip_durations(&self, inputs: &[MergeInput]) -> Vec<f64> {
        let mut durations = Vec::with_capacity(inputs.len());
        for input in inputs {
            let duration = match get_duration(&self.ffprobe, &input.path).await {
                Ok(duration) => duration,
                Err(e) => {
                    warn!(
                        "Probing {} failed, using nominal duration {:.3}s: {}",
                        input.path.display(),
                        input.nominal_duration_secs,
                        e
                    );
                    input.nominal_duration_secs
                }
            };
            durations.push(duration);
        }
        durations
    }
}

#[async_trait]
impl ClipMerger for FfmpegMerger {
    async fn merge(
        &self,
        request: &MergeRequest,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<PathBuf> {
        if request.inputs.is_empty() {
            return Err(MediaError::invalid_merge("no clips to merge"));
        }

        let durations = if request.config.mode == MergeMode::Transition {
            self.clip_durations(&request.inputs).await
        } else {
            request
                .inputs
                .iter()
                .map(|i| i.nominal_duration_secs)
                .collect()
        };
        let graph = build_filter_graph(&request.config, &durations)?;
        debug!(mode = %request.config.mode, "Merge filter graph: {}", graph);

        let cmd = request
            .inputs
            .iter()
            .fold(FfmpegCommand::new(&request.output), |cmd, input| cmd.input(&input.path))
            .filter_complex(graph)
            .map("[vout]")
            .no_audio()
            .video_codec("libx264")
            .preset(self.preset.clone())
            .crf(self.crf)
            .pixel_format("yuv420p")
            .frame_rate(request.config.fps)
            .output_arg("-movflags")
            .output_arg("+faststart");

        FfmpegRunner::new(self.ffmpeg.clone())
            .with_cancel(cancel)
            .run(&cmd)
            .await
            .map_err(|e| match e {
                MediaError::FfmpegFailed { stderr, exit_code, .. } => MediaError::ffmpeg_failed(
                    format!("{} merge failed", request.config.mode),
                    stderr,
                    exit_code,
                ),
                other => other,
            })?;

        info!(
            mode = %request.config.mode,
            clips = request.inputs.len(),
            "Merged clips into {}",
            request.output.display()
        );
        Ok(request.output.clone())
    }
}

/// ffmpeg `xfade` transition name.
pub fn xfade_name(kind: TransitionKind) -> &'static str {
    match kind {
        TransitionKind::Fade => "fade",
        TransitionKind::FadeBlack => "fadeblack",
        TransitionKind::Dissolve => "dissolve",
        TransitionKind::WipeLeft => "wipeleft",
        TransitionKind::WipeRight => "wiperight",
        TransitionKind::SlideLeft => "slideleft",
        TransitionKind::SlideRight => "slideright",
        TransitionKind::CircleOpen => "circleopen",
    }
}

/// Build the `-filter_complex` graph for `config` over clips of the given
/// durations. The final video stream is labelled `[vout]`.
pub fn build_filter_graph(config: &MergeConfig, durations: &[f64]) -> MediaResult<String> {
    let n = durations.len();
    if n == 0 {
        return Err(MediaError::invalid_merge("no clips to merge"));
    }

    let w = config.resolution.width;
    let h = config.resolution.height;
    let fps = config.fps;

    // Overlay layers keep their alpha and get transparent padding so lower
    // layers stay visible; other modes merge opaque frames
    let (pad_color, pix_fmt) = match config.mode {
        MergeMode::Overlay => ("black@0", "yuva420p"),
        _ => ("black", "yuv420p"),
    };

    // Inputs are normalized to one canvas, rate and timebase before merging
    let mut graph = String::new();
    for i in 0..n {
        let _ = write!(
            graph,
            "[{i}:v]format={pix_fmt},scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color={pad_color},fps={fps},setsar=1,\
             setpts=PTS-STARTPTS,format={pix_fmt}[v{i}];"
        );
    }

    match config.mode {
        MergeMode::Sequence => {
            for i in 0..n {
                let _ = write!(graph, "[v{i}]");
            }
            let _ = write!(graph, "concat=n={n}:v=1:a=0[vout]");
        }
        MergeMode::Overlay => {
            let mut prev = "v0".to_string();
            for i in 1..n {
                let label = format!("o{i}");
                let _ = write!(graph, "[{prev}][v{i}]overlay=0:0:shortest=1[{label}];");
                prev = label;
            }
            let _ = write!(graph, "[{prev}]format=yuv420p[vout]");
        }
        MergeMode::Transition => {
            let transition = config.transition.ok_or_else(|| {
                MediaError::invalid_merge("transition mode requires a transition")
            })?;
            let td = transition.duration_secs;
            if durations.iter().any(|d| *d <= td) {
                return Err(MediaError::invalid_merge(format!(
                    "transition of {:.3}s is not shorter than every clip",
                    td
                )));
            }

            let name = xfade_name(transition.kind);
            let mut prev = "v0".to_string();
            let mut elapsed = 0.0;
            for i in 1..n {
                // Each xfade overlaps the tail of the running output by td
                elapsed += durations[i - 1];
                let offset = elapsed - i as f64 * td;
                let label = format!("x{i}");
                let _ = write!(
                    graph,
                    "[{prev}][v{i}]xfade=transition={name}:duration={td:.3}:offset={offset:.3}[{label}];"
                );
                prev = label;
            }
            let _ = write!(graph, "[{prev}]null[vout]");
        }
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{Resolution, TransitionSpec};

    fn config(mode: MergeMode, transition: Option<TransitionSpec>) -> MergeConfig {
        MergeConfig {
            mode,
            resolution: Resolution::new(720, 1280),
            fps: 30,
            transition,
        }
    }

    #[test]
    fn test_sequence_graph() {
        let graph = build_filter_graph(&config(MergeMode::Sequence, None), &[2.0, 3.0]).unwrap();
        assert!(graph.contains("[0:v]format=yuv420p,scale=720:1280:force_original_aspect_ratio=decrease"));
        assert!(graph.contains(":color=black,fps=30"));
        assert!(graph.ends_with("[v0][v1]concat=n=2:v=1:a=0[vout]"));
    }

    #[test]
    fn test_overlay_graph_stacks_later_on_top() {
        let graph =
            build_filter_graph(&config(MergeMode::Overlay, None), &[2.0, 3.0, 4.0]).unwrap();
        assert!(graph.contains("[v0][v1]overlay=0:0:shortest=1[o1];"));
        assert!(graph.contains("[o1][v2]overlay=0:0:shortest=1[o2];"));
        assert!(graph.ends_with("[o2]format=yuv420p[vout]"));
    }

    #[test]
    fn test_overlay_layers_keep_alpha() {
        let graph = build_filter_graph(&config(MergeMode::Overlay, None), &[2.0, 3.0]).unwrap();
        for i in 0..2 {
            let chain = graph
                .split(';')
                .find(|part| part.starts_with(&format!("[{i}:v]")))
                .unwrap();
            assert!(chain.starts_with(&format!("[{i}:v]format=yuva420p,")));
            assert!(chain.contains(":color=black@0,"));
            assert!(chain.ends_with(&format!("format=yuva420p[v{i}]")));
        }
    }

    #[test]
    fn test_transition_offsets() {
        let transition = TransitionSpec {
            kind: TransitionKind::Fade,
            duration_secs: 0.5,
        };
        let graph = build_filter_graph(
            &config(MergeMode::Transition, Some(transition)),
            &[2.0, 3.0, 4.0],
        )
        .unwrap();

        assert!(graph.contains(
            "[v0][v1]xfade=transition=fade:duration=0.500:offset=1.500[x1];"
        ));
        // 2 + 3 - 2 * 0.5
        assert!(graph.contains(
            "[x1][v2]xfade=transition=fade:duration=0.500:offset=4.000[x2];"
        ));
        assert!(graph.ends_with("[x2]null[vout]"));
    }

    #[test]
    fn test_transition_requires_config() {
        let err = build_filter_graph(&config(MergeMode::Transition, None), &[2.0, 2.0]);
        assert!(matches!(err, Err(MediaError::InvalidMerge(_))));
    }

    #[test]
    fn test_transition_longer_than_probed_clip() {
        let transition = TransitionSpec {
            kind: TransitionKind::WipeLeft,
            duration_secs: 1.0,
        };
        let err = build_filter_graph(
            &config(MergeMode::Transition, Some(transition)),
            &[2.0, 0.9],
        );
        assert!(matches!(err, Err(MediaError::InvalidMerge(_))));
    }

    #[test]
    fn test_single_clip_graph() {
        let graph = build_filter_graph(&config(MergeMode::Overlay, None), &[2.0]).unwrap();
        assert!(graph.ends_with("[v0]format=yuv420p[vout]"));
        assert!(build_filter_graph(&config(MergeMode::Sequence, None), &[]).is_err());
    }

    #[test]
    fn test_xfade_names() {
        assert_eq!(xfade_name(TransitionKind::CircleOpen), "circleopen");
        assert_eq!(xfade_name(TransitionKind::SlideRight), "slideright");
    }
}
