//! Transform request to ffmpeg argument vector.
//!
//! Everything here is pure: no filesystem access, no process spawning. The
//! caller resolves asset ids to paths first and passes them in
//! [`ResolvedInputs`].
//!
//! User-supplied overlay text goes through two escaping levels before it
//! reaches ffmpeg. Option-value escaping wraps it in single quotes so `:`
//! and `=` cannot start a new option. Filtergraph escaping then backslashes
//! `\ ' [ ] , ;` so it cannot end the filter or open a new link.
//! `expansion=none` turns off `%{...}` expansion in drawtext.

use std::path::{Path, PathBuf};

use uuid::Uuid;
use vf_core::config::TransformConfig;
use vf_core::{Error, Result, TransformKind, TransformRequest};

/// Arguments every invocation starts with.
const COMMON_ARGS: &[&str] = &["-hide_banner", "-nostdin", "-y"];

/// Characters with meaning to the filtergraph parser.
const GRAPH_SPECIAL: &[char] = &['\\', '\'', '[', ']', ',', ';'];

/// Knobs that are configuration rather than part of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOptions {
    /// Bounding box for the overlay stream of a video overlay.
    pub overlay_scale: (u32, u32),
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self::from(&TransformConfig::default())
    }
}

impl From<&TransformConfig> for FilterOptions {
    fn from(cfg: &TransformConfig) -> Self {
        Self {
            overlay_scale: (cfg.overlay_scale_width, cfg.overlay_scale_height),
        }
    }
}

/// Input paths resolved from the request's asset references.
#[derive(Debug, Clone)]
pub struct ResolvedInputs {
    pub input: PathBuf,
    /// Second input for image and video overlays.
    pub overlay: Option<PathBuf>,
}

/// A ready-to-run ffmpeg command line (without the program itself).
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub output: PathBuf,
}

impl Invocation {
    /// The value passed to `-vf` or `-filter_complex`, if any.
    pub fn filter_graph(&self) -> Option<&str> {
        self.args
            .windows(2)
            .find(|w| w[0] == "-vf" || w[0] == "-filter_complex")
            .map(|w| w[1].as_str())
    }
}

/// Fresh output path for one job: `<dir>/<uuid>_<kind>.<ext>`.
///
/// The extension follows the input when it is a plain alphanumeric one and
/// falls back to `mp4`.
pub fn output_locator(dir: &Path, input: &Path, kind: TransformKind) -> PathBuf {
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("mp4");
    dir.join(format!("{}_{}.{}", Uuid::new_v4(), kind, ext))
}

/// Build the ffmpeg arguments for `request`.
///
/// Returns [`Error::Internal`] when the resolved inputs do not match the
/// request shape (an overlay without its second input, or the reverse).
/// Request validation has already happened, so this is a programming error.
pub fn build_invocation(
    request: &TransformRequest,
    inputs: &ResolvedInputs,
    output: &Path,
    options: &FilterOptions,
) -> Result<Invocation> {
    if output == inputs.input {
        return Err(Error::Internal(format!(
            "output {} would overwrite its input",
            output.display()
        )));
    }

    let mut args: Vec<String> = COMMON_ARGS.iter().map(|s| s.to_string()).collect();
    let input = path_arg(&inputs.input);

    match request {
        TransformRequest::Trim {
            start_secs,
            end_secs,
            ..
        } => {
            no_overlay_expected(request, inputs)?;
            args.extend([
                "-i".into(),
                input,
                "-ss".into(),
                format_secs(*start_secs),
                "-to".into(),
                format_secs(*end_secs),
                "-c".into(),
                "copy".into(),
            ]);
        }
        TransformRequest::TextOverlay {
            text,
            x,
            y,
            font_size,
            font_color,
            ..
        } => {
            no_overlay_expected(request, inputs)?;
            let filter = format!(
                "drawtext=text={}:x={x}:y={y}:fontsize={font_size}:fontcolor={font_color}:expansion=none",
                escape_option_value(text)
            );
            args.extend([
                "-i".into(),
                input,
                "-vf".into(),
                escape_filtergraph(&filter),
                "-codec:a".into(),
                "copy".into(),
            ]);
        }
        TransformRequest::ImageOverlay { x, y, .. } => {
            let overlay = overlay_input(request, inputs)?;
            let graph = format!("[0:v][1:v]overlay={x}:{y}[vout]");
            push_composite(&mut args, input, overlay, graph);
        }
        TransformRequest::VideoOverlay { x, y, .. } => {
            let overlay = overlay_input(request, inputs)?;
            let (w, h) = options.overlay_scale;
            let graph = format!("[1:v]scale={w}:{h}[ov];[0:v][ov]overlay={x}:{y}[vout]");
            push_composite(&mut args, input, overlay, graph);
        }
    }

    args.push(path_arg(output));
    Ok(Invocation {
        args,
        output: output.to_path_buf(),
    })
}

/// Two-input composite keeping the main input's audio untouched.
fn push_composite(args: &mut Vec<String>, input: String, overlay: String, graph: String) {
    args.extend([
        "-i".into(),
        input,
        "-i".into(),
        overlay,
        "-filter_complex".into(),
        graph,
        "-map".into(),
        "[vout]".into(),
        "-map".into(),
        "0:a?".into(),
        "-c:a".into(),
        "copy".into(),
    ]);
}

fn overlay_input(request: &TransformRequest, inputs: &ResolvedInputs) -> Result<String> {
    inputs.overlay.as_deref().map(path_arg).ok_or_else(|| {
        Error::Internal(format!("{} request resolved without an overlay input", request.kind()))
    })
}

fn no_overlay_expected(request: &TransformRequest, inputs: &ResolvedInputs) -> Result<()> {
    if inputs.overlay.is_some() {
        return Err(Error::Internal(format!(
            "{} request resolved with an unexpected overlay input",
            request.kind()
        )));
    }
    Ok(())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Seconds in the shortest form ffmpeg accepts (`5`, `15.25`).
fn format_secs(secs: f64) -> String {
    format!("{secs}")
}

/// Quote a value for the filter option parser.
///
/// Inside single quotes everything is literal, so only a quote itself needs
/// handling: close the quote, emit an escaped quote, reopen.
pub fn escape_option_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Backslash-escape characters the filtergraph parser would act on.
pub fn escape_filtergraph(filter: &str) -> String {
    let mut out = String::with_capacity(filter.len() + 8);
    for c in filter.chars() {
        if GRAPH_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
