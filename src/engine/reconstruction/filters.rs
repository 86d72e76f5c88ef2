use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::config::RemovalConfig;
use crate::types::{BoundingBox, RemovalMethod, WatermarkCandidate};

/// Label of the input video stream in the rendered graph.
pub const INPUT_LABEL: &str = "0:v";
/// Label of the filtered video stream mapped into the output.
pub const OUTPUT_LABEL: &str = "vout";

const SMOOTHING_PARAMS: &str = "4:3:6:4.5";

/// One step of the removal filter chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterDirective {
    /// Rectangular mask interpolated from its border (`delogo`).
    MaskRemoval { region: BoundingBox },
    /// Neighbouring strip cropped, flipped and laid over the region.
    MirrorFill { region: BoundingBox },
    /// Mask removal followed by a blurred band around the region.
    SoftEdgeRemoval { region: BoundingBox, band_px: u32 },
    /// Whole-frame denoise, used when nothing was detected.
    Smoothing,
}

impl FilterDirective {
    pub fn region(&self) -> Option<BoundingBox> {
        match self {
            FilterDirective::MaskRemoval { region }
            | FilterDirective::MirrorFill { region }
            | FilterDirective::SoftEdgeRemoval { region, .. } => Some(*region),
            FilterDirective::Smoothing => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemovalFilterBuilder {
    soft_edge_px: u32,
}

impl RemovalFilterBuilder {
    pub fn new(config: &RemovalConfig) -> Self {
        Self {
            soft_edge_px: config.soft_edge_px,
        }
    }

    /// One directive per watermark, in input order. Overlapping boxes are not
    /// merged. An empty watermark list yields a single smoothing directive.
    pub fn build(
        &self,
        method: RemovalMethod,
        watermarks: &[WatermarkCandidate],
    ) -> Vec<FilterDirective> {
        if watermarks.is_empty() {
            return vec![FilterDirective::Smoothing];
        }

        watermarks
            .iter()
            .map(|wm| {
                let region = wm.location;
                match method {
                    RemovalMethod::FrequencyDomain => FilterDirective::MaskRemoval { region },
                    RemovalMethod::ContentAware => FilterDirective::MirrorFill { region },
                    RemovalMethod::Inpainting | RemovalMethod::TemporalCoherence => {
                        FilterDirective::SoftEdgeRemoval {
                            region,
                            band_px: self.soft_edge_px,
                        }
                    }
                }
            })
            .collect()
    }

    /// Renders the directives as a `-filter_complex` graph running from
    /// `[0:v]` to `[vout]`. Regions are clamped into the frame.
    pub fn render(
        &self,
        directives: &[FilterDirective],
        frame_width: u32,
        frame_height: u32,
    ) -> String {
        if directives.is_empty() {
            return format!("[{}]null[{}]", INPUT_LABEL, OUTPUT_LABEL);
        }

        let mut segments = Vec::with_capacity(directives.len());
        let last = directives.len() - 1;

        for (i, directive) in directives.iter().enumerate() {
            let input = if i == 0 { INPUT_LABEL.to_string() } else { format!("v{}", i) };
            let output = if i == last { OUTPUT_LABEL.to_string() } else { format!("v{}", i + 1) };
            segments.push(render_directive(
                directive,
                i,
                &input,
                &output,
                frame_width,
                frame_height,
            ));
        }

        let graph = segments.join(";");
        debug!(directives = directives.len(), graph = %graph, "rendered filter graph");
        graph
    }
}

impl Default for RemovalFilterBuilder {
    fn default() -> Self {
        Self::new(&RemovalConfig::default())
    }
}

fn render_directive(
    directive: &FilterDirective,
    step: usize,
    input: &str,
    output: &str,
    frame_width: u32,
    frame_height: u32,
) -> String {
    match directive {
        FilterDirective::Smoothing => format!("[{}]hqdn3d={}[{}]", input, SMOOTHING_PARAMS, output),
        FilterDirective::MaskRemoval { region } => {
            let area = delogo_area(region, frame_width, frame_height);
            format!("[{}]{}[{}]", input, delogo(&area), output)
        }
        FilterDirective::MirrorFill { region } => {
            let area = region.clamp_to(frame_width, frame_height);
            match mirror_source(&area, frame_width, frame_height) {
                Some(source) => format!(
                    concat!(
                        "[{input}]split[base{s}][src{s}];",
                        "[src{s}]crop={w}:{h}:{sx}:{sy},{flip}[patch{s}];",
                        "[base{s}][patch{s}]overlay={x}:{y}[{output}]",
                    ),
                    input = input,
                    output = output,
                    s = step,
                    w = area.width,
                    h = area.height,
                    sx = source.x,
                    sy = source.y,
                    flip = source.flip,
                    x = area.x,
                    y = area.y,
                ),
                // no room for a same-sized neighbour
                None => {
                    let area = delogo_area(region, frame_width, frame_height);
                    format!("[{}]{}[{}]", input, delogo(&area), output)
                }
            }
        }
        FilterDirective::SoftEdgeRemoval { region, band_px } => {
            let area = delogo_area(region, frame_width, frame_height);
            let band = expand(&area, *band_px, frame_width, frame_height);
            let radius = blur_radius(*band_px, &band);
            format!(
                concat!(
                    "[{input}]{delogo},split[base{s}][edge{s}];",
                    "[edge{s}]crop={w}:{h}:{x}:{y},boxblur=luma_radius={r}:luma_power=1[blur{s}];",
                    "[base{s}][blur{s}]overlay={x}:{y}[{output}]",
                ),
                input = input,
                output = output,
                delogo = delogo(&area),
                s = step,
                w = band.width,
                h = band.height,
                x = band.x,
                y = band.y,
                r = radius,
            )
        }
    }
}

fn delogo(area: &BoundingBox) -> String {
    format!("delogo=x={}:y={}:w={}:h={}", area.x, area.y, area.width, area.height)
}

/// `delogo` interpolates from the surrounding pixels, so the area must leave
/// a one pixel border inside the frame.
fn delogo_area(region: &BoundingBox, frame_width: u32, frame_height: u32) -> BoundingBox {
    let clamped = region.clamp_to(frame_width, frame_height);
    let x = clamped.x.max(1);
    let y = clamped.y.max(1);
    let max_w = frame_width.saturating_sub(1).saturating_sub(x);
    let max_h = frame_height.saturating_sub(1).saturating_sub(y);
    BoundingBox::new(
        x,
        y,
        clamped.right().saturating_sub(x).min(max_w).max(1),
        clamped.bottom().saturating_sub(y).min(max_h).max(1),
    )
}

fn expand(area: &BoundingBox, band_px: u32, frame_width: u32, frame_height: u32) -> BoundingBox {
    let x = area.x.saturating_sub(band_px);
    let y = area.y.saturating_sub(band_px);
    let right = area.right().saturating_add(band_px).min(frame_width);
    let bottom = area.bottom().saturating_add(band_px).min(frame_height);
    BoundingBox::new(x, y, right.saturating_sub(x).max(1), bottom.saturating_sub(y).max(1))
}

/// Chroma planes are half size, and boxblur caps the radius at half a plane.
fn blur_radius(band_px: u32, band: &BoundingBox) -> u32 {
    let plane_limit = band.width.min(band.height) / 4;
    (band_px / 2).min(plane_limit).max(1)
}

struct MirrorSource {
    x: u32,
    y: u32,
    flip: &'static str,
}

/// Picks the neighbouring strip to mirror: left, right, above, then below.
fn mirror_source(area: &BoundingBox, frame_width: u32, frame_height: u32) -> Option<MirrorSource> {
    if area.x >= area.width {
        Some(MirrorSource {
            x: area.x - area.width,
            y: area.y,
            flip: "hflip",
        })
    } else if area.right().saturating_add(area.width) <= frame_width {
        Some(MirrorSource {
            x: area.right(),
            y: area.y,
            flip: "hflip",
        })
    } else if area.y >= area.height {
        Some(MirrorSource {
            x: area.x,
            y: area.y - area.height,
            flip: "vflip",
        })
    } else if area.bottom().saturating_add(area.height) <= frame_height {
        Some(MirrorSource {
            x: area.x,
            y: area.bottom(),
            flip: "vflip",
        })
    } else {
        None
    }
}
