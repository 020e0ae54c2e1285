use kurbo::{BezPath, CubicBez, PathEl, Point};
use crate::error::{EngineError, EngineResult};
use crate::path::PathPoint;

/// Tolerance used when cubic segments are approximated by quadratics.
const CUBIC_ACCURACY: f64 = 0.1;

/// Path geometry pulled out of an SVG document.
#[derive(Clone, Debug, PartialEq)]
pub struct SvgPaths {
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub points: Vec<PathPoint>,
}

fn parse_length(value: Option<&str>) -> Option<f64> {
    value?.trim().trim_end_matches("px").parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

/// Collects every `<path d>` in the document, in document order, as one
/// list of path points. Document size comes from `viewBox`, falling back
/// to `width`/`height`.
pub fn parse_svg_paths(svg: &str) -> EngineResult<SvgPaths> {
    let doc = roxmltree::Document::parse(svg).map_err(|e| EngineError::InvalidResponse(format!("bad SVG: {}", e)))?;
    let root = doc.root_element();
    if root.tag_name().name() != "svg" {
        return Err(EngineError::InvalidResponse("root element is not <svg>".into()));
    }
    let mut width = parse_length(root.attribute("width"));
    let mut height = parse_length(root.attribute("height"));
    if let Some(viewbox) = root.attribute("viewBox") {
        let parts: Vec<f64> = viewbox
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter_map(|s| s.parse::<f64>().ok())
            .collect();
        if parts.len() == 4 {
            width = Some(parts[2]);
            height = Some(parts[3]);
        }
    }

    let mut points = Vec::new();
    for node in root.descendants().filter(|n| n.has_tag_name("path")) {
        let d = match node.attribute("d") {
            Some(d) => d,
            None => continue,
        };
        match BezPath::from_svg(d) {
            Ok(bez) => append_bez(&bez, &mut points),
            Err(e) => log::warn!("skipping unparsable SVG path: {:?}", e),
        }
    }
    Ok(SvgPaths { width, height, points })
}

/// Lowers a kurbo path to `M`/`L`/`Q`/`Z` commands; cubics become runs of
/// quadratics.
fn append_bez(bez: &BezPath, out: &mut Vec<PathPoint>) {
    let mut current = Point::ZERO;
    for el in bez.elements() {
        match *el {
            PathEl::MoveTo(p) => {
                out.push(PathPoint::Move { x: p.x, y: p.y });
                current = p;
            }
            PathEl::LineTo(p) => {
                out.push(PathPoint::Line { x: p.x, y: p.y });
                current = p;
            }
            PathEl::QuadTo(c, p) => {
                out.push(PathPoint::Quad { cp1x: c.x, cp1y: c.y, x: p.x, y: p.y });
                current = p;
            }
            PathEl::CurveTo(c1, c2, p) => {
                for (_, _, quad) in CubicBez::new(current, c1, c2, p).to_quads(CUBIC_ACCURACY) {
                    out.push(PathPoint::Quad { cp1x: quad.p1.x, cp1y: quad.p1.y, x: quad.p2.x, y: quad.p2.y });
                }
                current = p;
            }
            PathEl::ClosePath => out.push(PathPoint::Close),
        }
    }
}
