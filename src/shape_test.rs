#![allow(clippy::float_cmp)]

use serde_json::json;
use uuid::Uuid;

use super::*;

fn rect(x: f64, y: f64) -> Shape {
    Shape {
        id: Uuid::new_v4(),
        kind: ShapeKind::Rectangle,
        x,
        y,
        width: Some(100.0),
        height: Some(80.0),
        radius: None,
        font_size: None,
        text: None,
        rotation: 0.0,
        color: "#D94B4B".to_owned(),
        opacity: 1.0,
        shadow_color: None,
        shadow_strength: None,
        border_color: None,
        border_width: None,
        group_id: None,
        z_index: 0,
        locked_at: None,
        locked_by: None,
    }
}

fn circle(x: f64, y: f64, r: f64) -> Shape {
    Shape {
        kind: ShapeKind::Circle,
        width: None,
        height: None,
        radius: Some(r),
        ..rect(x, y)
    }
}

// =============================================================
// Lock predicate
// =============================================================

#[test]
fn lock_fresh_is_locked() {
    let mut s = rect(0.0, 0.0);
    s.locked_at = Some(9_000);
    s.locked_by = Some(Uuid::new_v4());
    assert!(s.is_locked(10_000));
}

#[test]
fn lock_expired_is_not_locked() {
    let mut s = rect(0.0, 0.0);
    s.locked_at = Some(0);
    s.locked_by = Some(Uuid::new_v4());
    // Exactly at the timeout boundary the lock is expired.
    assert!(!s.is_locked(10_000));
    assert!(!s.is_locked(11_000));
}

#[test]
fn lock_absent_is_not_locked() {
    let s = rect(0.0, 0.0);
    assert!(!s.is_locked(5_000));
}

#[test]
fn locked_by_other_ignores_own_lock() {
    let me = Uuid::new_v4();
    let mut s = rect(0.0, 0.0);
    s.locked_at = Some(1_000);
    s.locked_by = Some(me);
    assert!(!s.is_locked_by_other(me, 2_000));
    assert!(s.is_locked_by_other(Uuid::new_v4(), 2_000));
}

// =============================================================
// Rotation wrap
// =============================================================

#[test]
fn wrap_rotation_in_range_unchanged() {
    assert_eq!(wrap_rotation(45.0), 45.0);
    assert_eq!(wrap_rotation(0.0), 0.0);
}

#[test]
fn wrap_rotation_wraps_over_360() {
    assert_eq!(wrap_rotation(370.0), 10.0);
    assert_eq!(wrap_rotation(720.0), 0.0);
}

#[test]
fn wrap_rotation_wraps_negative() {
    assert_eq!(wrap_rotation(-10.0), 350.0);
    assert_eq!(wrap_rotation(-370.0), 350.0);
}

// =============================================================
// Bounding box
// =============================================================

#[test]
fn bounds_of_rect_use_width_height() {
    let s = rect(0.0, 0.0);
    assert_eq!(s.bounds_width(), 100.0);
    assert_eq!(s.bounds_height(), 80.0);
}

#[test]
fn bounds_of_circle_use_diameter() {
    let s = circle(0.0, 0.0, 25.0);
    assert_eq!(s.bounds_width(), 50.0);
    assert_eq!(s.bounds_height(), 50.0);
}

// =============================================================
// Shape serde
// =============================================================

#[test]
fn shape_serde_uses_camel_case_wire_names() {
    let mut s = rect(1.0, 2.0);
    s.locked_at = Some(42);
    s.z_index = 3;
    let value = serde_json::to_value(&s).unwrap();
    assert_eq!(value["type"], "rectangle");
    assert_eq!(value["lockedAt"], 42);
    assert_eq!(value["zIndex"], 3);
    assert!(value.get("radius").is_none());
}

#[test]
fn shape_serde_roundtrip() {
    let mut s = circle(5.0, 6.0, 10.0);
    s.shadow_color = Some("#000000".to_owned());
    s.shadow_strength = Some(0.4);
    let json = serde_json::to_string(&s).unwrap();
    let back: Shape = serde_json::from_str(&json).unwrap();
    assert_eq!(back.id, s.id);
    assert_eq!(back.kind, ShapeKind::Circle);
    assert_eq!(back.radius, Some(10.0));
    assert_eq!(back.shadow_strength, Some(0.4));
}

#[test]
fn shape_deserialize_defaults_opacity_and_rotation() {
    let value = json!({
        "id": Uuid::new_v4(),
        "type": "text",
        "x": 0.0,
        "y": 0.0,
        "fontSize": 16.0,
        "text": "hello",
        "color": "#1F1A17",
    });
    let s: Shape = serde_json::from_value(value).unwrap();
    assert_eq!(s.opacity, 1.0);
    assert_eq!(s.rotation, 0.0);
}

// =============================================================
// PartialShape
// =============================================================

#[test]
fn partial_at_sets_only_position() {
    let p = PartialShape::at(3.0, 4.0);
    assert_eq!(p.x, Some(3.0));
    assert_eq!(p.y, Some(4.0));
    assert!(p.color.is_none());
    assert!(!p.is_empty());
    assert!(PartialShape::default().is_empty());
}

#[test]
fn partial_overlay_preserves_present_fields_only() {
    let mut incoming = PartialShape {
        x: Some(500.0),
        y: Some(500.0),
        color: Some("#00ff00".to_owned()),
        ..PartialShape::default()
    };
    let preserved = PartialShape::at(10.0, 20.0);
    incoming.overlay(&preserved);
    assert_eq!(incoming.x, Some(10.0));
    assert_eq!(incoming.y, Some(20.0));
    // Fields the local user wasn't editing still come from the server.
    assert_eq!(incoming.color.as_deref(), Some("#00ff00"));
}

#[test]
fn partial_capture_before_mirrors_touched_fields() {
    let s = rect(7.0, 8.0);
    let update = PartialShape {
        x: Some(100.0),
        opacity: Some(0.5),
        ..PartialShape::default()
    };
    let before = update.capture_before(&s);
    assert_eq!(before.x, Some(7.0));
    assert_eq!(before.opacity, Some(1.0));
    assert!(before.y.is_none());
    assert!(before.color.is_none());
}

#[test]
fn partial_lock_clear_serializes_null_and_roundtrips() {
    let p = PartialShape {
        locked_at: Some(None),
        locked_by: Some(None),
        ..PartialShape::default()
    };
    let value = serde_json::to_value(&p).unwrap();
    assert_eq!(value["lockedAt"], serde_json::Value::Null);
    let back: PartialShape = serde_json::from_value(value).unwrap();
    assert_eq!(back.locked_at, Some(None));
    assert_eq!(back.locked_by, Some(None));
}

#[test]
fn partial_ungroup_null_decodes_as_clear() {
    let back: PartialShape = serde_json::from_value(json!({"groupId": null})).unwrap();
    assert_eq!(back.group_id, Some(None));

    let group = Uuid::new_v4();
    let back: PartialShape = serde_json::from_value(json!({"groupId": group})).unwrap();
    assert_eq!(back.group_id, Some(Some(group)));
}

#[test]
fn partial_lock_release_survives_a_wire_trip() {
    let mut store = ShapeStore::new();
    let mut s = rect(0.0, 0.0);
    s.locked_at = Some(1_000);
    s.locked_by = Some(Uuid::new_v4());
    let id = s.id;
    store.insert(s);

    // A release as another client would receive it: encoded, decoded,
    // applied.
    let release = PartialShape {
        locked_at: Some(None),
        locked_by: Some(None),
        ..PartialShape::default()
    };
    let text = serde_json::to_string(&release).unwrap();
    let received: PartialShape = serde_json::from_str(&text).unwrap();
    store.apply_partial(&id, &received);

    let s = store.get(&id).unwrap();
    assert_eq!(s.locked_at, None);
    assert_eq!(s.locked_by, None);
}

#[test]
fn partial_missing_lock_fields_deserialize_as_unchanged() {
    let back: PartialShape = serde_json::from_value(json!({"x": 1.0})).unwrap();
    assert_eq!(back.locked_at, None);
    assert_eq!(back.locked_by, None);
}

#[test]
fn shape_equality_covers_all_fields() {
    let a = rect(1.0, 2.0);
    let b = a.clone();
    assert_eq!(a, b);
    let mut c = a.clone();
    c.opacity = 0.5;
    assert_ne!(a, c);
}

// =============================================================
// ShapeStore
// =============================================================

#[test]
fn store_insert_get_remove() {
    let mut store = ShapeStore::new();
    let s = rect(0.0, 0.0);
    let id = s.id;
    store.insert(s);
    assert_eq!(store.len(), 1);
    assert!(store.get(&id).is_some());
    assert!(store.remove(&id).is_some());
    assert!(store.is_empty());
}

#[test]
fn store_apply_partial_updates_fields() {
    let mut store = ShapeStore::new();
    let s = rect(0.0, 0.0);
    let id = s.id;
    store.insert(s);

    let ok = store.apply_partial(
        &id,
        &PartialShape {
            x: Some(50.0),
            rotation: Some(370.0),
            opacity: Some(2.0),
            ..PartialShape::default()
        },
    );
    assert!(ok);
    let s = store.get(&id).unwrap();
    assert_eq!(s.x, 50.0);
    // Rotation wraps, opacity clamps.
    assert_eq!(s.rotation, 10.0);
    assert_eq!(s.opacity, 1.0);
}

#[test]
fn store_apply_partial_clears_lock_via_double_option() {
    let mut store = ShapeStore::new();
    let mut s = rect(0.0, 0.0);
    s.locked_at = Some(1_000);
    s.locked_by = Some(Uuid::new_v4());
    let id = s.id;
    store.insert(s);

    store.apply_partial(
        &id,
        &PartialShape {
            locked_at: Some(None),
            locked_by: Some(None),
            ..PartialShape::default()
        },
    );
    let s = store.get(&id).unwrap();
    assert_eq!(s.locked_at, None);
    assert_eq!(s.locked_by, None);
}

#[test]
fn store_apply_partial_missing_shape_returns_false() {
    let mut store = ShapeStore::new();
    assert!(!store.apply_partial(&Uuid::new_v4(), &PartialShape::at(1.0, 1.0)));
}

#[test]
fn store_snapshot_replaces_contents() {
    let mut store = ShapeStore::new();
    store.insert(rect(0.0, 0.0));
    let replacement = vec![rect(1.0, 1.0), rect(2.0, 2.0)];
    store.load_snapshot(replacement);
    assert_eq!(store.len(), 2);
}

#[test]
fn store_sorted_by_z_index_then_id() {
    let mut store = ShapeStore::new();
    let mut a = rect(0.0, 0.0);
    a.z_index = 5;
    let mut b = rect(0.0, 0.0);
    b.z_index = 1;
    store.insert(a.clone());
    store.insert(b.clone());
    let sorted = store.sorted_shapes();
    assert_eq!(sorted[0].id, b.id);
    assert_eq!(sorted[1].id, a.id);
}

#[test]
fn store_group_members_finds_shared_group() {
    let mut store = ShapeStore::new();
    let group = Uuid::new_v4();
    let mut a = rect(0.0, 0.0);
    a.group_id = Some(group);
    let mut b = rect(1.0, 1.0);
    b.group_id = Some(group);
    let c = rect(2.0, 2.0);
    store.insert(a.clone());
    store.insert(b.clone());
    store.insert(c);
    let mut members = store.group_members(group);
    members.sort();
    let mut expected = vec![a.id, b.id];
    expected.sort();
    assert_eq!(members, expected);
}
