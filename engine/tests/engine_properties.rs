use canvas_engine::history::SnapshotContent;
use canvas_engine::image_ops::{bucket_fill, flood_select};
use canvas_engine::layer::Layer;
use canvas_engine::layer_ops::{BlankCanvasSpec, LayerPlacement, LayerPropertiesUpdate, LayerUpdate};
use canvas_engine::path::{self, PathPoint};
use canvas_engine::tracer::{segment_distance, simplify};
use canvas_engine::{CanvasEngine, LayerId, LayerKind, Unit};
use image::{Rgba, RgbaImage};
use kurbo::Point;

fn add(engine: &mut CanvasEngine, layer: Layer) -> LayerId {
    let name = layer.name.clone();
    engine.create_layer(&name, layer.kind, layer.content, layer.metadata, LayerPlacement::DocumentCenter)
}

fn rename(engine: &mut CanvasEngine, id: LayerId, name: &str) {
    let update = LayerUpdate::Raster(LayerPropertiesUpdate { name: Some(name.to_string()), ..Default::default() });
    assert!(engine.update_layer_properties(id, &update));
}

fn blank(engine: &mut CanvasEngine, width: f64, height: f64) {
    engine.create_blank_canvas(&BlankCanvasSpec { name: None, width, height, unit: Unit::Px, dpi: 72.0 });
}

#[test]
fn path_round_trip() {
    let d = "M 0,0 L 10,0 L 10,10 Z";
    let points = path::parse(d);
    assert_eq!(
        points,
        vec![
            PathPoint::Move { x: 0.0, y: 0.0 },
            PathPoint::Line { x: 10.0, y: 0.0 },
            PathPoint::Line { x: 10.0, y: 10.0 },
            PathPoint::Close,
        ]
    );
    assert_eq!(path::serialize(&points), d);
}

#[test]
fn path_parse_tolerates_noise() {
    let points = path::parse("m 1,2 L 3 Q 1,1 2,2 X 9,9 L 1e2,5");
    assert_eq!(
        points,
        vec![
            PathPoint::Move { x: 1.0, y: 2.0 },
            PathPoint::Quad { cp1x: 1.0, cp1y: 1.0, x: 2.0, y: 2.0 },
            PathPoint::Line { x: 100.0, y: 5.0 },
        ]
    );
}

#[test]
fn undo_restores_exact_snapshot() {
    let mut engine = CanvasEngine::default();
    blank(&mut engine, 64.0, 48.0);
    let id = engine.create_drawing_layer();
    let before = serde_json::to_string(&engine.layer(id).unwrap().snapshot()).unwrap();

    assert!(engine.paint_stroke(&[Point::new(5.0, 5.0), Point::new(40.0, 30.0)]));
    let after = serde_json::to_string(&engine.layer(id).unwrap().snapshot()).unwrap();
    assert_ne!(before, after);

    assert!(engine.undo());
    let restored = serde_json::to_string(&engine.layer(id).unwrap().snapshot()).unwrap();
    assert_eq!(before, restored);

    assert!(engine.redo());
    let redone = serde_json::to_string(&engine.layer(id).unwrap().snapshot()).unwrap();
    assert_eq!(after, redone);
}

#[test]
fn global_undo_restores_deleted_layer() {
    let mut engine = CanvasEngine::default();
    blank(&mut engine, 32.0, 32.0);
    let id = engine.create_drawing_layer();
    let snapshot = engine.layer(id).unwrap().snapshot();
    assert!(engine.delete_layer(id));
    assert!(engine.layer(id).is_none());

    assert!(engine.undo_global());
    assert_eq!(engine.layer(id).unwrap().snapshot(), snapshot);
    assert!(engine.redo_global());
    assert!(engine.layer(id).is_none());
}

#[test]
fn flood_fill_covers_uniform_region() {
    let mut surface = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
    assert!(bucket_fill(&mut surface, Point::new(5.0, 5.0), [0, 0, 0], 255, 30.0));
    assert!(surface.pixels().all(|p| *p == Rgba([0, 0, 0, 255])));
}

#[test]
fn flood_fill_respects_zero_tolerance() {
    let mut surface = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
    surface.put_pixel(0, 0, Rgba([254, 255, 255, 255]));
    assert!(bucket_fill(&mut surface, Point::new(5.0, 5.0), [0, 0, 0], 255, 0.0));
    assert_eq!(*surface.get_pixel(0, 0), Rgba([254, 255, 255, 255]));
    assert_eq!(surface.pixels().filter(|p| **p == Rgba([0, 0, 0, 255])).count(), 99);
}

#[test]
fn fill_through_engine_is_undoable() {
    let mut engine = CanvasEngine::default();
    blank(&mut engine, 10.0, 10.0);
    let id = engine.selected_layer_id().unwrap();
    assert!(engine.fill_at(Point::new(5.0, 5.0)));
    assert_eq!(*engine.layer(id).unwrap().surface().unwrap().get_pixel(9, 9), Rgba([0, 0, 0, 255]));
    assert!(engine.undo());
    assert_eq!(*engine.layer(id).unwrap().surface().unwrap().get_pixel(9, 9), Rgba([255, 255, 255, 255]));
}

fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let v = ((x * 7 + y * 3) % 256) as u8;
        Rgba([v, v / 2, 255 - v, 255])
    })
}

#[test]
fn magic_wand_mask_grows_with_tolerance() {
    let surface = gradient(40, 30);
    let seed = (20, 15);
    let target = *surface.get_pixel(seed.0, seed.1);
    for contiguous in [true, false] {
        let mut previous: Option<Vec<bool>> = None;
        for tolerance in [0.0, 10.0, 30.0, 80.0, 200.0] {
            let mask = flood_select(&surface, seed, target, tolerance, contiguous);
            if let Some(prev) = &previous {
                assert!(prev.iter().zip(&mask).all(|(a, b)| !*a || *b), "mask shrank at tolerance {}", tolerance);
            }
            previous = Some(mask);
        }
    }
}

#[test]
fn magic_wand_through_engine() {
    let mut engine = CanvasEngine::default();
    let mut surface = RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255]));
    for y in 5..15 {
        for x in 5..15 {
            surface.put_pixel(x, y, Rgba([200, 0, 0, 255]));
        }
    }
    let layer = Layer::raster("Photo", LayerKind::Pattern, surface, 96.0);
    let id = add(&mut engine, layer);

    engine.config_mut().magic_wand.tolerance = 10.0;
    assert!(engine.magic_wand_at_pixel(id, (10, 10), false));
    let narrow = engine.magic_wand_mask().unwrap().clone();
    assert_eq!(narrow.count(), 100);
    assert!(engine.selection().is_active());

    engine.config_mut().magic_wand.tolerance = 400.0;
    assert!(engine.magic_wand_at_pixel(id, (10, 10), false));
    let wide = engine.magic_wand_mask().unwrap().clone();
    assert!(narrow.is_subset_of(&wide));
    assert_eq!(wide.count(), 400);
}

#[test]
fn simplification_keeps_points_within_tolerance() {
    let points: Vec<Point> = (0..200)
        .map(|i| {
            let t = i as f64 / 10.0;
            Point::new(t * 5.0, (t * 1.3).sin() * 8.0 + (t * 0.4).cos() * 3.0)
        })
        .collect();
    let tolerance = 1.5;
    let simplified = simplify(&points, tolerance);
    assert_eq!(simplified.first(), points.first());
    assert_eq!(simplified.last(), points.last());
    assert!(simplified.len() < points.len());

    // Every dropped point lies within tolerance of the kept segment that
    // replaced it.
    let mut kept = 0;
    for p in &points {
        if simplified.get(kept) == Some(p) {
            kept += 1;
            continue;
        }
        let (a, b) = (simplified[kept - 1], simplified[kept]);
        assert!(segment_distance(*p, a, b) <= tolerance + 1e-9);
    }
}

#[test]
fn blank_canvas_document() {
    let mut engine = CanvasEngine::default();
    blank(&mut engine, 800.0, 600.0);
    let doc = engine.document();
    assert_eq!((doc.width, doc.height), (800, 600));
    assert_eq!(doc.layers.len(), 1);
    let layer = &doc.layers[0];
    assert_eq!(layer.name, "Background");
    assert_eq!(layer.kind, LayerKind::Background);
    assert_eq!((layer.metadata.original_width, layer.metadata.original_height), (800.0, 600.0));
    assert_eq!((layer.transform.x, layer.transform.y), (400.0, 300.0));
    assert_eq!(engine.global_history_info().labels, vec!["New Document".to_string()]);
    assert!(!engine.undo_global());
}

#[test]
fn blank_canvas_converts_units() {
    let mut engine = CanvasEngine::default();
    engine.create_blank_canvas(&BlankCanvasSpec { name: Some("Paper".into()), width: 2.54, height: 1.0, unit: Unit::Cm, dpi: 300.0 });
    assert_eq!((engine.document().width, engine.document().height), (300, 118));
    assert_eq!(engine.document().layers[0].name, "Paper");
}

#[test]
fn duplicate_folder_keeps_members_and_order() {
    let mut engine = CanvasEngine::default();
    blank(&mut engine, 50.0, 50.0);
    let a = engine.create_drawing_layer();
    let _outside = engine.create_drawing_layer();
    let b = engine.create_drawing_layer();
    rename(&mut engine, a, "A");
    rename(&mut engine, b, "B");
    let folder = engine.create_folder(Some("Group"));
    assert!(engine.move_layer_to_folder(b, Some(folder)));
    assert!(engine.move_layer_to_folder(a, Some(folder)));

    let copy = engine.duplicate_folder(folder).unwrap();
    let doc = engine.document();
    let source = doc.folder(folder).unwrap();
    let dup = doc.folder(copy).unwrap();
    assert_eq!(dup.name, "Group copy");
    assert_eq!(dup.layer_ids.len(), source.layer_ids.len());
    assert!(dup.layer_ids.iter().all(|id| !source.layer_ids.contains(id)));

    let z = |id| doc.index_of(id).unwrap();
    let mut src_order: Vec<_> = source.layer_ids.iter().map(|id| (z(*id), doc.layer(*id).unwrap().name.clone())).collect();
    let mut dup_order: Vec<_> = dup.layer_ids.iter().map(|id| (z(*id), doc.layer(*id).unwrap().name.clone())).collect();
    src_order.sort();
    dup_order.sort();
    let src_names: Vec<_> = src_order.into_iter().map(|(_, n)| format!("{} copy", n)).collect();
    let dup_names: Vec<_> = dup_order.into_iter().map(|(_, n)| n).collect();
    assert_eq!(src_names, dup_names);
    assert!(dup.layer_ids.iter().all(|id| doc.layer(*id).unwrap().folder_id == Some(copy)));
}

#[test]
fn vector_layer_snapshot_keeps_path() {
    let mut engine = CanvasEngine::default();
    let layer = Layer::vector("Shape", "M 0,0 L 4,4", Default::default());
    let id = add(&mut engine, layer);
    match &engine.layer(id).unwrap().snapshot().content {
        SnapshotContent::Vector { path_data, .. } => assert_eq!(path_data, "M 0,0 L 4,4"),
        other => panic!("unexpected snapshot content {:?}", other),
    }
}

#[test]
fn view_changes_do_not_add_global_steps() {
    let mut engine = CanvasEngine::default();
    blank(&mut engine, 100.0, 100.0);
    let background = engine.selected_layer_id().unwrap();
    let drawing = engine.create_drawing_layer();
    engine.zoom_at_point(2.0, Point::new(50.0, 50.0));
    assert!(engine.select_layer(Some(background)));
    assert!(engine.delete_layer(drawing));
    assert_eq!(
        engine.global_history_info().labels,
        vec!["New Document".to_string(), "Add Drawing Layer".to_string(), "Delete Layer: Drawing Layer".to_string()]
    );

    assert!(engine.undo_global());
    assert!(engine.layer(drawing).is_some());
    assert_eq!(engine.viewport().zoom, 2.0);
    assert_eq!(engine.selected_layer_id(), Some(background));
}
