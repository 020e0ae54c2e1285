use kurbo::Point;

/// Moore neighborhood, clockwise starting west.
const NEIGHBOR_OFFSETS: [(i32, i32); 8] = [(-1, 0), (-1, -1), (0, -1), (1, -1), (1, 0), (1, 1), (0, 1), (-1, 1)];

pub struct Tracer {
    width: u32,
    height: u32,
}

impl Tracer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn is_set(&self, mask: &[bool], x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
            && mask[(y as u32 * self.width + x as u32) as usize]
    }

    /// Outer contour of the first region found in raster order, in pixel
    /// coordinates. Empty when the mask has no set pixel.
    pub fn trace(&self, mask: &[bool]) -> Vec<Point> {
        if mask.len() < (self.width * self.height) as usize {
            return Vec::new();
        }
        let start = match mask.iter().position(|&b| b) {
            Some(i) => ((i as u32 % self.width) as i32, (i as u32 / self.width) as i32),
            None => return Vec::new(),
        };

        let max_steps = 4 * (self.width as usize * self.height as usize) + 8;
        let mut contour = Vec::new();
        let mut current = start;
        let mut dir = 0usize;
        loop {
            contour.push(Point::new(current.0 as f64, current.1 as f64));
            let mut found = false;
            for i in 0..8 {
                let check = (dir + i) % 8;
                let (dx, dy) = NEIGHBOR_OFFSETS[check];
                let next = (current.0 + dx, current.1 + dy);
                if self.is_set(mask, next.0, next.1) {
                    current = next;
                    // Resume the scan from the neighbor after the backtrack cell.
                    dir = (check + 5) % 8;
                    found = true;
                    break;
                }
            }
            if !found || current == start || contour.len() >= max_steps {
                break;
            }
        }
        contour
    }
}

/// Distance from `p` to the segment `a`-`b`.
pub fn segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len2 = ab.hypot2();
    if len2 == 0.0 {
        return (p - a).hypot();
    }
    let t = (p - a).dot(ab) / len2;
    let closest = if t < 0.0 { a } else if t > 1.0 { b } else { a + ab * t };
    (p - closest).hypot()
}

/// Douglas-Peucker on an explicit work stack. Endpoints are always kept.
pub fn simplify(points: &[Point], tolerance: f64) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0usize, points.len() - 1)];
    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }
        let mut index = first;
        let mut max_dist = 0.0;
        for i in first + 1..last {
            let dist = segment_distance(points[i], points[first], points[last]);
            if dist > max_dist {
                max_dist = dist;
                index = i;
            }
        }
        if max_dist > tolerance {
            keep[index] = true;
            stack.push((first, index));
            stack.push((index, last));
        }
    }

    points.iter().zip(keep).filter(|(_, k)| *k).map(|(p, _)| *p).collect()
}
