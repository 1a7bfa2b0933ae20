//! Prefab creation, diffs, revert and update working together

use super::{child, shape, test_scene, Marker};
use crate::components::{FollowComponent, MovementComponent, RenderableComponent};
use crate::foundation::math::Vec3;
use crate::prefab::{Prefab, PrefabDiff, PrefabLibrary, PrefabLinkUtility};
use crate::reflect::Value;
use crate::scene::{DeserializationFlags, Handle, Scene, SceneNode, SceneNodeFlags};

/// Player with two marked children, turned into a prefab
fn player_prefab(scene: &mut Scene) -> (Handle<SceneNode>, Prefab) {
    let player = scene.create_node("Player", SceneNodeFlags::empty());
    let arm = child(scene, &player, "A");
    let leg = child(scene, &player, "B");
    scene.add_component(&arm, Marker::new(0.0, "arm")).unwrap();
    scene.add_component(&leg, Marker::new(1.0, "leg")).unwrap();

    let prefab = Prefab::create(scene, &player).unwrap();
    (player, prefab)
}

fn marker_of(scene: &Scene, node: &Handle<SceneNode>) -> Handle<Marker> {
    scene.get_component::<Marker>(node).unwrap().unwrap()
}

fn named(scene: &Scene, node: &Handle<SceneNode>, name: &str) -> Handle<SceneNode> {
    scene.find_child(node, name, true).unwrap().unwrap()
}

#[test]
fn test_marker_change_is_recorded_and_reverted() {
    let mut scene = test_scene();
    let root = scene.create_node("R", SceneNodeFlags::empty());
    let a = child(&mut scene, &root, "A");
    scene.add_component(&a, Marker::new(0.0, "a")).unwrap();

    let prefab = Prefab::create(&mut scene, &root).unwrap();
    assert_eq!(scene.node(&a).unwrap().link_id(), Some(1));
    let mut library = PrefabLibrary::new();
    let instance = prefab.instantiate(&mut scene).unwrap();
    library.insert(prefab);

    let instance_a = named(&scene, &instance, "A");
    let marker = marker_of(&scene, &instance_a);
    scene.component_mut(&marker).unwrap().x = 5.0;

    let template = library.get(scene.node(&instance).unwrap().prefab_link().unwrap()).unwrap();
    let diff = PrefabDiff::generate_for(&scene, template.root(), &instance).unwrap();
    assert_eq!(diff.child_diffs.len(), 1);
    assert_eq!(diff.child_diffs[0].component_diffs.len(), 1);
    let delta = &diff.child_diffs[0].component_diffs[0].delta;
    assert_eq!(delta.fields.len(), 1);
    assert_eq!(delta.get("x"), Some(&Value::Float(5.0)));

    PrefabLinkUtility::revert_to_prefab(&mut scene, &library, &instance).unwrap();
    assert_eq!(scene.component(&marker).unwrap().x, 0.0);
    assert_eq!(scene.component_owner(&marker).unwrap(), instance_a);
    assert!(scene.is_component_enabled(&marker).unwrap());
}

#[test]
fn test_fresh_instance_has_no_diff() {
    let mut scene = test_scene();
    let (player, prefab) = player_prefab(&mut scene);
    let instance = prefab.instantiate(&mut scene).unwrap();

    assert!(PrefabDiff::generate_for(&scene, prefab.root(), &instance).unwrap().is_empty());
    assert!(PrefabDiff::generate_for(&scene, prefab.root(), &player).unwrap().is_empty());

    let mut library = PrefabLibrary::new();
    library.insert(prefab);
    PrefabLinkUtility::record_prefab_diff(&mut scene, &library, &instance).unwrap();
    assert!(scene.node(&instance).unwrap().prefab_diff().is_none());
}

#[test]
fn test_applied_diff_reproduces_instance() {
    let mut scene = test_scene();
    let (_, prefab) = player_prefab(&mut scene);
    let edited = prefab.instantiate(&mut scene).unwrap();

    let arm = named(&scene, &edited, "A");
    let leg = named(&scene, &edited, "B");
    scene.set_name(&arm, "Arm").unwrap();
    let arm_marker = marker_of(&scene, &arm);
    scene.component_mut(&arm_marker).unwrap().x = 5.0;
    scene
        .add_component(&arm, MovementComponent::with_velocity(Vec3::new(1.0, 0.0, 0.0)))
        .unwrap();
    scene.set_position(&leg, Vec3::new(1.0, 2.0, 3.0)).unwrap();
    let leg_marker = marker_of(&scene, &leg);
    scene.destroy_component(&leg_marker, true).unwrap();
    let extra = child(&mut scene, &edited, "Extra");
    scene.add_component(&extra, Marker::new(7.0, "extra")).unwrap();

    let diff = PrefabDiff::generate_for(&scene, prefab.root(), &edited).unwrap();
    assert_eq!(diff.added_children.len(), 1);
    assert!(diff.removed_children.is_empty());

    let fresh = prefab.instantiate(&mut scene).unwrap();
    let report = PrefabDiff::apply(&mut scene, &diff, &fresh).unwrap();
    assert_eq!(report.skipped, 0);
    assert!(report.applied >= 5);

    assert_eq!(shape(&scene, &fresh), shape(&scene, &edited));
    let fresh_extra = named(&scene, &fresh, "Extra");
    assert!(scene.node(&fresh_extra).unwrap().is_instantiated());
    let fresh_marker = marker_of(&scene, &fresh_extra);
    assert!(scene.is_component_enabled(&fresh_marker).unwrap());
}

#[test]
fn test_apply_skips_drifted_entries() {
    let mut scene = test_scene();
    let (_, prefab) = player_prefab(&mut scene);
    let edited = prefab.instantiate(&mut scene).unwrap();
    let arm = named(&scene, &edited, "A");
    let leg = named(&scene, &edited, "B");
    let arm_marker = marker_of(&scene, &arm);
    scene.component_mut(&arm_marker).unwrap().x = 2.0;
    scene.set_name(&leg, "Shin").unwrap();
    let diff = PrefabDiff::generate_for(&scene, prefab.root(), &edited).unwrap();

    let target = prefab.instantiate(&mut scene).unwrap();
    let target_leg = named(&scene, &target, "B");
    scene.destroy(&target_leg, true).unwrap();

    let report = PrefabDiff::apply(&mut scene, &diff, &target).unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.applied, 1);
    let target_marker = marker_of(&scene, &named(&scene, &target, "A"));
    assert_eq!(scene.component(&target_marker).unwrap().x, 2.0);
}

#[test]
fn test_revert_is_idempotent_and_keeps_handles() {
    let mut scene = test_scene();
    let (_, prefab) = player_prefab(&mut scene);
    let instance = prefab.instantiate(&mut scene).unwrap();
    let mut library = PrefabLibrary::new();
    let uuid = library.insert(prefab);

    let arm = named(&scene, &instance, "A");
    let arm_marker = marker_of(&scene, &arm);
    scene.component_mut(&arm_marker).unwrap().label = "changed".to_string();
    scene.set_position(&instance, Vec3::new(0.0, 4.0, 0.0)).unwrap();
    let extra = child(&mut scene, &arm, "Extra");

    PrefabLinkUtility::record_prefab_diff(&mut scene, &library, &arm).unwrap();
    assert!(scene.node(&instance).unwrap().prefab_diff().is_some());

    PrefabLinkUtility::revert_to_prefab(&mut scene, &library, &arm).unwrap();
    assert!(extra.is_destroyed(false));
    assert_eq!(scene.component(&arm_marker).unwrap().label, "arm");
    assert_eq!(scene.node(&arm).unwrap().name(), "A");
    assert_eq!(scene.parent(&arm).unwrap(), Some(instance.clone()));
    assert_eq!(scene.root_nodes().last(), Some(&instance));
    assert_eq!(scene.node(&instance).unwrap().prefab_link(), Some(uuid.as_str()));

    PrefabLinkUtility::record_prefab_diff(&mut scene, &library, &instance).unwrap();
    assert!(scene.node(&instance).unwrap().prefab_diff().is_none());

    let first = scene.encode_subtree(&instance).unwrap();
    PrefabLinkUtility::revert_to_prefab(&mut scene, &library, &instance).unwrap();
    assert_eq!(scene.encode_subtree(&instance).unwrap(), first);
}

#[test]
fn test_update_from_prefab_keeps_handles_and_local_changes() {
    let mut scene = test_scene();
    let (player, prefab) = player_prefab(&mut scene);
    let instance = prefab.instantiate(&mut scene).unwrap();
    let mut library = PrefabLibrary::new();
    let uuid = library.insert(prefab);

    let arm = named(&scene, &instance, "A");
    let arm_marker = marker_of(&scene, &arm);
    scene.component_mut(&arm_marker).unwrap().x = 5.0;
    let extra = child(&mut scene, &arm, "Extra");
    let follow = scene
        .add_component(&extra, FollowComponent::new(arm.clone(), Vec3::zeros()))
        .unwrap();
    PrefabLinkUtility::record_prefab_diff(&mut scene, &library, &instance).unwrap();

    assert_eq!(PrefabLinkUtility::update_from_prefab(&mut scene, &library, &instance).unwrap(), 0);

    scene
        .add_component(&player, RenderableComponent::new("player.obj", "skin"))
        .unwrap();
    library.get_mut(&uuid).unwrap().update(&mut scene, &player).unwrap();
    let new_hash = library.get(&uuid).unwrap().hash();
    assert_ne!(scene.node(&instance).unwrap().prefab_hash(), new_hash);

    assert_eq!(PrefabLinkUtility::update_from_prefab(&mut scene, &library, &instance).unwrap(), 1);

    assert_eq!(scene.node(&instance).unwrap().prefab_hash(), new_hash);
    assert!(scene.node(&instance).unwrap().prefab_diff().is_some());
    assert!(scene.get_component::<RenderableComponent>(&instance).unwrap().is_some());

    assert_eq!(scene.component(&arm_marker).unwrap().x, 5.0);
    assert_eq!(scene.parent(&extra).unwrap(), Some(arm.clone()));
    assert_eq!(scene.component_owner(&follow).unwrap(), extra);
    assert_eq!(scene.component(&follow).unwrap().target, arm);
    assert!(scene.node(&extra).unwrap().is_instantiated());

    assert_eq!(PrefabLinkUtility::update_from_prefab(&mut scene, &library, &instance).unwrap(), 0);
}

#[test]
fn test_apply_inside_outer_session_binds_at_session_end() {
    let mut scene = test_scene();
    let (_, prefab) = player_prefab(&mut scene);
    let edited = prefab.instantiate(&mut scene).unwrap();
    let arm = named(&scene, &edited, "A");
    let extra = child(&mut scene, &arm, "Extra");
    scene
        .add_component(&extra, FollowComponent::new(arm.clone(), Vec3::zeros()))
        .unwrap();
    let diff = PrefabDiff::generate_for(&scene, prefab.root(), &edited).unwrap();

    let target = prefab.instantiate(&mut scene).unwrap();
    let target_arm = named(&scene, &target, "A");

    scene
        .registry_mut()
        .begin_deserialization(DeserializationFlags::USE_NEW_IDS)
        .unwrap();
    PrefabDiff::apply(&mut scene, &diff, &target).unwrap();

    let target_extra = named(&scene, &target_arm, "Extra");
    let follow = scene.get_component::<FollowComponent>(&target_extra).unwrap().unwrap();
    let pending = scene.component(&follow).unwrap().target.clone();
    assert!(pending.is_pending());

    scene.registry_mut().end_deserialization().unwrap();
    assert!(!pending.is_pending());
    assert_eq!(pending, target_arm);
    assert_ne!(pending, arm);
}

#[test]
fn test_stream_ids_do_not_capture_payload_handles() {
    let mut scene = test_scene();
    let (_, prefab) = player_prefab(&mut scene);
    let edited = prefab.instantiate(&mut scene).unwrap();
    let arm = named(&scene, &edited, "A");
    let extra = child(&mut scene, &arm, "Extra");
    scene
        .add_component(&extra, FollowComponent::new(arm.clone(), Vec3::zeros()))
        .unwrap();
    let diff = PrefabDiff::generate_for(&scene, prefab.root(), &edited).unwrap();

    let target = prefab.instantiate(&mut scene).unwrap();
    let target_arm = named(&scene, &target, "A");

    // Stream object saved under the id the payload handle carries
    let loose = scene.create_node("FromFile", SceneNodeFlags::SKIP_INSTANTIATE);
    let mut saved = scene.encode_subtree(&loose).unwrap();
    saved.instance_id = target_arm.instance_id();

    scene
        .registry_mut()
        .begin_deserialization(DeserializationFlags::USE_NEW_IDS)
        .unwrap();
    PrefabDiff::apply(&mut scene, &diff, &target).unwrap();
    let decoded = scene.decode_in_session(&saved).unwrap();
    scene.registry_mut().end_deserialization().unwrap();

    let decoded = scene.nodes[decoded].handle.clone();
    assert_ne!(decoded, target_arm);

    let target_extra = named(&scene, &target_arm, "Extra");
    let follow = scene.get_component::<FollowComponent>(&target_extra).unwrap().unwrap();
    let bound = scene.component(&follow).unwrap().target.clone();
    assert_eq!(bound, target_arm);
    assert_eq!(scene.node(&bound).unwrap().name(), "A");
}

/// Car prefab whose marker points inside a mounted wheel instance
fn car_prefab(scene: &mut Scene) -> Prefab {
    let wheel = scene.create_node("Wheel", SceneNodeFlags::empty());
    child(scene, &wheel, "Hub");
    child(scene, &wheel, "Rim");
    let wheel_prefab = Prefab::create(scene, &wheel).unwrap();

    let car = scene.create_node("Car", SceneNodeFlags::empty());
    let mounted = wheel_prefab.instantiate(scene).unwrap();
    scene.set_parent(&mounted, &car, false).unwrap();
    let mut marker = Marker::new(0.0, "car");
    marker.target = named(scene, &mounted, "Hub");
    scene.add_component(&car, marker).unwrap();
    Prefab::create(scene, &car).unwrap()
}

#[test]
fn test_reference_into_nested_instance_has_no_diff() {
    let mut scene = test_scene();
    let prefab = car_prefab(&mut scene);

    let instance = prefab.instantiate(&mut scene).unwrap();
    assert!(PrefabDiff::generate_for(&scene, prefab.root(), &instance).unwrap().is_empty());

    let hub = named(&scene, &instance, "Hub");
    let marker = marker_of(&scene, &instance);
    assert_eq!(scene.component(&marker).unwrap().target, hub);

    let other = prefab.instantiate(&mut scene).unwrap();
    assert_ne!(named(&scene, &other, "Hub"), hub);
    assert!(PrefabDiff::generate_for(&scene, prefab.root(), &other).unwrap().is_empty());
}

#[test]
fn test_retarget_inside_nested_instance_applies_to_copy() {
    let mut scene = test_scene();
    let prefab = car_prefab(&mut scene);

    let edited = prefab.instantiate(&mut scene).unwrap();
    let edited_rim = named(&scene, &edited, "Rim");
    let marker = marker_of(&scene, &edited);
    scene.component_mut(&marker).unwrap().target = edited_rim.clone();

    let diff = PrefabDiff::generate_for(&scene, prefab.root(), &edited).unwrap();
    assert_eq!(diff.component_diffs.len(), 1);
    let Some(Value::Local(_)) = diff.component_diffs[0].delta.get("target") else {
        panic!("expected a link-relative target");
    };

    let fresh = prefab.instantiate(&mut scene).unwrap();
    let report = PrefabDiff::apply(&mut scene, &diff, &fresh).unwrap();
    assert_eq!(report.applied, 1);

    let fresh_rim = named(&scene, &fresh, "Rim");
    let fresh_marker = marker_of(&scene, &fresh);
    assert_eq!(scene.component(&fresh_marker).unwrap().target, fresh_rim);
    assert_ne!(fresh_rim, edited_rim);
}

#[test]
fn test_nested_prefab_update_reaches_outer_instances() {
    let mut scene = test_scene();
    let wheel = scene.create_node("Wheel", SceneNodeFlags::empty());
    scene.add_component(&wheel, Marker::new(1.0, "rim")).unwrap();
    let wheel_prefab = Prefab::create(&mut scene, &wheel).unwrap();

    let car = scene.create_node("Car", SceneNodeFlags::empty());
    let mounted = wheel_prefab.instantiate(&mut scene).unwrap();
    scene.set_parent(&mounted, &car, false).unwrap();
    let car_prefab = Prefab::create(&mut scene, &car).unwrap();
    assert_eq!(scene.node(&mounted).unwrap().link_id(), Some(0));

    let mut library = PrefabLibrary::new();
    let wheel_uuid = library.insert(wheel_prefab);
    let car_uuid = library.insert(car_prefab);
    let car_instance = library.get(&car_uuid).unwrap().instantiate(&mut scene).unwrap();
    let car_wheel = named(&scene, &car_instance, "Wheel");
    assert_eq!(scene.node(&car_wheel).unwrap().prefab_link(), Some(wheel_uuid.as_str()));

    scene
        .add_component(&wheel, RenderableComponent::new("wheel.obj", "rubber"))
        .unwrap();
    library.get_mut(&wheel_uuid).unwrap().update(&mut scene, &wheel).unwrap();

    assert_eq!(PrefabLinkUtility::update_from_prefab(&mut scene, &library, &car_instance).unwrap(), 1);
    assert!(scene.get_component::<RenderableComponent>(&car_wheel).unwrap().is_some());
    assert_eq!(scene.parent(&car_wheel).unwrap(), Some(car_instance.clone()));
    assert_eq!(scene.node(&car_wheel).unwrap().link_id(), Some(0));

    let car_hash = library.get(&car_uuid).unwrap().hash();
    assert_eq!(library.update_child_instances(&mut scene, &car_uuid).unwrap(), 1);
    let car_template = library.get(&car_uuid).unwrap();
    assert_ne!(car_template.hash(), car_hash);
    assert_eq!(car_template.root().children[0].components.len(), 2);
}

#[test]
fn test_generate_and_clear_prefab_ids() {
    let mut scene = test_scene();
    let root = scene.create_node("Root", SceneNodeFlags::empty());
    let a = child(&mut scene, &root, "A");
    let b = child(&mut scene, &a, "B");
    scene.add_component(&b, Marker::default()).unwrap();

    assert_eq!(PrefabLinkUtility::generate_prefab_ids(&mut scene, &root).unwrap(), 3);
    assert!(scene.node(&a).unwrap().link_id().is_some());
    assert!(scene.node(&b).unwrap().link_id().is_some());
    assert_eq!(PrefabLinkUtility::generate_prefab_ids(&mut scene, &root).unwrap(), 3);

    PrefabLinkUtility::clear_prefab_ids(&mut scene, &root, true, false).unwrap();
    assert!(scene.node(&a).unwrap().link_id().is_none());
    assert!(scene.node(&b).unwrap().link_id().is_none());
    let marker = marker_of(&scene, &b);
    assert_eq!(scene.component_link_id(&marker).unwrap(), None);
}

#[test]
fn test_prefab_file_round_trip() {
    let mut scene = test_scene();
    let (_, prefab) = player_prefab(&mut scene);
    let path = std::env::temp_dir().join(format!("scene_engine_player_{}.prefab.ron", std::process::id()));

    prefab.save_to_file(&path).unwrap();
    let mut library = PrefabLibrary::new();
    let uuid = library.load_file(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(uuid, prefab.uuid());
    let loaded = library.require(&uuid).unwrap();
    assert_eq!(loaded.hash(), prefab.hash());
    let instance = loaded.instantiate(&mut scene).unwrap();
    assert!(PrefabDiff::generate_for(&scene, prefab.root(), &instance).unwrap().is_empty());
}
