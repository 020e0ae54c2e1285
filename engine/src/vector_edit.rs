use serde::{Serialize, Deserialize};
use kurbo::Point;
use crate::engine::CanvasEngine;
use crate::history::LayerSnapshot;
use crate::path::{self, PathPoint};
use crate::types::{LayerId, Tool};

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    Anchor,
    Control,
}

#[derive(Serialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct DraggedPoint {
    pub index: usize,
    pub kind: PointKind,
}

/// Point editing on one vector layer. The working points always mirror the
/// layer's path data.
#[derive(Clone, Debug)]
pub struct VectorEditSession {
    pub layer_id: LayerId,
    pub points: Vec<PathPoint>,
    pub dragged: Option<DraggedPoint>,
    /// Layer state when editing began; exit commits against it.
    pub entry_snapshot: LayerSnapshot,
}

#[derive(Serialize, Debug)]
pub struct VectorSessionSummary<'a> {
    pub layer_id: LayerId,
    pub points: &'a [PathPoint],
    pub dragged: Option<DraggedPoint>,
}

impl VectorEditSession {
    pub fn summary(&self) -> VectorSessionSummary<'_> {
        VectorSessionSummary { layer_id: self.layer_id, points: &self.points, dragged: self.dragged }
    }
}

impl CanvasEngine {
    /// Starts point editing on a vector layer. Clears any selection and
    /// switches to the direct-select tool.
    pub fn enter_vector_edit(&mut self, id: LayerId) -> bool {
        if self.vector_edit.as_ref().map(|s| s.layer_id == id).unwrap_or(false) {
            return true;
        }
        let (points, entry_snapshot) = match self.document.layer(id) {
            Some(layer) => match layer.vector_content() {
                Some(vector) => (path::parse(&vector.path_data), layer.snapshot()),
                None => return false,
            },
            None => return false,
        };
        self.exit_vector_edit();
        self.selection.clear();
        self.selected_layer_id = Some(id);
        self.vector_edit = Some(VectorEditSession { layer_id: id, points, dragged: None, entry_snapshot });
        self.active_tool = Tool::DirectSelect;
        log::debug!("vector edit on layer {}", id);
        true
    }

    /// Ends the session, committing one per-layer entry if the layer changed.
    pub fn exit_vector_edit(&mut self) -> bool {
        let session = match self.vector_edit.take() {
            Some(s) => s,
            None => return false,
        };
        self.commit_layer_edit(session.entry_snapshot, "Edit Vector");
        if self.active_tool == Tool::DirectSelect {
            self.active_tool = Tool::Move;
        }
        true
    }

    pub fn begin_point_drag(&mut self, index: usize, kind: PointKind) -> bool {
        let session = match self.vector_edit.as_mut() {
            Some(s) => s,
            None => return false,
        };
        let valid = match session.points.get(index) {
            Some(p) => match kind {
                PointKind::Anchor => p.anchor().is_some(),
                PointKind::Control => p.control().is_some(),
            },
            None => false,
        };
        session.dragged = if valid { Some(DraggedPoint { index, kind }) } else { None };
        valid
    }

    pub fn end_point_drag(&mut self) {
        if let Some(session) = self.vector_edit.as_mut() {
            session.dragged = None;
        }
    }

    /// Moves the dragged point to a world position.
    pub fn drag_point_to(&mut self, world: Point) -> bool {
        let (layer_id, dragged) = match &self.vector_edit {
            Some(VectorEditSession { layer_id, dragged: Some(d), .. }) => (*layer_id, *d),
            _ => return false,
        };
        let local = match self.document.layer(layer_id) {
            Some(layer) => layer.world_to_local(world),
            None => return false,
        };
        match dragged.kind {
            PointKind::Anchor => self.move_point(dragged.index, local),
            PointKind::Control => self.move_control_point(dragged.index, local),
        }
    }

    /// Moves the anchor at `index` to a layer-local position.
    pub fn move_point(&mut self, index: usize, local: Point) -> bool {
        self.edit_points(|points| match points.get_mut(index) {
            Some(p) if p.anchor().is_some() => {
                p.set_anchor(local);
                true
            }
            _ => false,
        })
    }

    /// Moves the control point of the quadratic at `index`.
    pub fn move_control_point(&mut self, index: usize, local: Point) -> bool {
        self.edit_points(|points| points.get_mut(index).map(|p| p.set_control(local)).unwrap_or(false))
    }

    /// Bends the straight segment ending at `index` into a quadratic whose
    /// control sits at the segment midpoint.
    pub fn add_curve_point(&mut self, layer_id: LayerId, index: usize) -> bool {
        match &self.vector_edit {
            Some(s) if s.layer_id == layer_id => {}
            _ => return false,
        }
        self.edit_points(|points| {
            if index == 0 || index >= points.len() {
                return false;
            }
            let start = match points[index - 1].anchor() {
                Some(p) => p,
                None => return false,
            };
            match points[index] {
                PathPoint::Line { x, y } => {
                    let mid = start.midpoint(Point::new(x, y));
                    points[index] = PathPoint::Quad { cp1x: mid.x, cp1y: mid.y, x, y };
                    true
                }
                _ => false,
            }
        })
    }

    /// Applies `edit` to the session's points and, if it reports a change,
    /// re-normalizes the layer around the new bounds.
    fn edit_points(&mut self, edit: impl FnOnce(&mut Vec<PathPoint>) -> bool) -> bool {
        let session = match self.vector_edit.as_mut() {
            Some(s) => s,
            None => return false,
        };
        let mut points = session.points.clone();
        if !edit(&mut points) {
            return false;
        }
        let layer_id = session.layer_id;
        let layer = match self.document.layer_mut(layer_id) {
            Some(l) => l,
            None => return false,
        };
        let bounds = match path::bounds(&points) {
            Some(b) => b,
            None => return false,
        };

        // The new local box starts at the bounds' minimum corner. Since x/y
        // is the box center rather than its top-left, the layer is moved by
        // mapping the new box center through the old transform instead of
        // by the rotated, scaled minimum-corner shift. Every point keeps its
        // world position either way.
        let width = if bounds.width() > 0.0 { bounds.width() } else { 1.0 };
        let height = if bounds.height() > 0.0 { bounds.height() } else { 1.0 };
        let new_center = layer.local_to_world(Point::new(bounds.x0 + width / 2.0, bounds.y0 + height / 2.0));
        path::translate(&mut points, -bounds.origin().to_vec2());

        layer.transform.x = new_center.x;
        layer.transform.y = new_center.y;
        layer.metadata.original_width = width;
        layer.metadata.original_height = height;
        if let Some(vector) = layer.vector_content_mut() {
            vector.path_data = path::serialize(&points);
        }
        layer.touch();
        if let Some(session) = self.vector_edit.as_mut() {
            session.points = points;
        }
        true
    }
}
