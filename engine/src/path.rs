use serde::{Serialize, Deserialize};
use kurbo::{BezPath, Point, Rect, Vec2};

/// One command of the path mini-language. Coordinates are layer-local.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
#[serde(tag = "type")]
pub enum PathPoint {
    #[serde(rename = "M")]
    Move { x: f64, y: f64 },
    #[serde(rename = "L")]
    Line { x: f64, y: f64 },
    #[serde(rename = "Q")]
    Quad { cp1x: f64, cp1y: f64, x: f64, y: f64 },
    #[serde(rename = "Z")]
    Close,
}

impl PathPoint {
    /// End point of the command, `None` for `Z`.
    pub fn anchor(&self) -> Option<Point> {
        match *self {
            PathPoint::Move { x, y } | PathPoint::Line { x, y } | PathPoint::Quad { x, y, .. } => Some(Point::new(x, y)),
            PathPoint::Close => None,
        }
    }

    pub fn control(&self) -> Option<Point> {
        match *self {
            PathPoint::Quad { cp1x, cp1y, .. } => Some(Point::new(cp1x, cp1y)),
            _ => None,
        }
    }

    pub fn set_anchor(&mut self, p: Point) {
        match self {
            PathPoint::Move { x, y } | PathPoint::Line { x, y } | PathPoint::Quad { x, y, .. } => {
                *x = p.x;
                *y = p.y;
            }
            PathPoint::Close => {}
        }
    }

    pub fn set_control(&mut self, p: Point) -> bool {
        match self {
            PathPoint::Quad { cp1x, cp1y, .. } => {
                *cp1x = p.x;
                *cp1y = p.y;
                true
            }
            _ => false,
        }
    }

    pub fn translate(&mut self, offset: Vec2) {
        if let Some(a) = self.anchor() {
            self.set_anchor(a + offset);
        }
        if let Some(c) = self.control() {
            self.set_control(c + offset);
        }
    }
}

fn is_command(c: char) -> bool {
    c.is_ascii_alphabetic() && c != 'e' && c != 'E'
}

/// Parses path data. Command letters are case-insensitive and always
/// absolute; `e` belongs to number exponents. Unknown commands and
/// incomplete coordinate groups are dropped, so malformed input degrades to
/// a shorter (possibly empty) list.
pub fn parse(d: &str) -> Vec<PathPoint> {
    let mut segments: Vec<(char, String)> = Vec::new();
    for c in d.chars() {
        if is_command(c) {
            segments.push((c.to_ascii_uppercase(), String::new()));
        } else if let Some((_, args)) = segments.last_mut() {
            args.push(c);
        }
    }

    let mut points = Vec::new();
    for (command, args) in segments {
        let numbers: Vec<f64> = args
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .filter_map(|t| t.parse::<f64>().ok())
            .collect();
        match command {
            'M' | 'L' => {
                for pair in numbers.chunks_exact(2) {
                    let (x, y) = (pair[0], pair[1]);
                    points.push(if command == 'M' { PathPoint::Move { x, y } } else { PathPoint::Line { x, y } });
                }
            }
            'Q' => {
                for group in numbers.chunks_exact(4) {
                    points.push(PathPoint::Quad { cp1x: group[0], cp1y: group[1], x: group[2], y: group[3] });
                }
            }
            'Z' => points.push(PathPoint::Close),
            _ => {}
        }
    }
    points
}

pub fn serialize(points: &[PathPoint]) -> String {
    let mut d = String::new();
    for p in points {
        match *p {
            PathPoint::Move { x, y } => d.push_str(&format!("M {},{} ", x, y)),
            PathPoint::Line { x, y } => d.push_str(&format!("L {},{} ", x, y)),
            PathPoint::Quad { cp1x, cp1y, x, y } => d.push_str(&format!("Q {},{} {},{} ", cp1x, cp1y, x, y)),
            PathPoint::Close => d.push_str("Z "),
        }
    }
    d.trim_end().to_string()
}

/// Tight box over anchors and control points, `Z` ignored.
pub fn bounds(points: &[PathPoint]) -> Option<Rect> {
    let mut coords = points.iter().flat_map(|p| p.anchor().into_iter().chain(p.control()));
    let first = coords.next()?;
    Some(coords.fold(Rect::from_points(first, first), |r, p| r.union_pt(p)))
}

pub fn translate(points: &mut [PathPoint], offset: Vec2) {
    for p in points {
        p.translate(offset);
    }
}

pub fn to_bez_path(points: &[PathPoint]) -> BezPath {
    let mut bez = BezPath::new();
    let mut open = false;
    for p in points {
        match *p {
            PathPoint::Move { x, y } => {
                bez.move_to((x, y));
                open = true;
            }
            PathPoint::Line { x, y } => {
                if !open { bez.move_to((x, y)); open = true; } else { bez.line_to((x, y)); }
            }
            PathPoint::Quad { cp1x, cp1y, x, y } => {
                if !open { bez.move_to((x, y)); open = true; } else { bez.quad_to((cp1x, cp1y), (x, y)); }
            }
            PathPoint::Close => {
                if open {
                    bez.close_path();
                    open = false;
                }
            }
        }
    }
    bez
}
