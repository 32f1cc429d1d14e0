use bevy_ecs::prelude::*;

use super::{
    ActiveCamera, AmbientLight, Camera, DirectionalLight, Light, MeshRenderer, ParticleEmitter,
    PointLight, SceneFrame, SpotLight, Transform,
};

/// Snapshot a world into a [`SceneFrame`].
///
/// The camera is the one marked [`ActiveCamera`], or any camera if none is
/// marked. Light ids are entity bits, so they stay stable while the entity
/// lives.
pub fn extract_scene(world: &mut World) -> SceneFrame {
    let mut frame = SceneFrame::new();

    let mut cameras = world.query::<(&Camera, Option<&ActiveCamera>)>();
    let mut fallback = None;
    for (camera, active) in cameras.iter(world) {
        if active.is_some() {
            frame.camera = Some(camera.clone());
            break;
        }
        fallback.get_or_insert_with(|| camera.clone());
    }
    if frame.camera.is_none() {
        frame.camera = fallback;
    }

    let mut meshes = world.query::<(&MeshRenderer, Option<&Transform>)>();
    for (renderer, transform) in meshes.iter(world).filter(|(r, _)| r.enabled) {
        frame.add_drawable(
            transform.copied().unwrap_or_default().matrix(),
            renderer.mesh.clone(),
            renderer.material.clone(),
        );
    }

    let mut points = world.query::<(Entity, &PointLight, Option<&Transform>)>();
    for (entity, light, transform) in points.iter(world) {
        let position = transform.map(|t| t.position).unwrap_or_default();
        frame.add_light(Light::point(entity.to_bits(), position, light));
    }

    let mut spots = world.query::<(Entity, &SpotLight, Option<&Transform>)>();
    for (entity, light, transform) in spots.iter(world) {
        let position = transform.map(|t| t.position).unwrap_or_default();
        frame.add_light(Light::spot(entity.to_bits(), position, light));
    }

    let mut directionals = world.query::<(Entity, &DirectionalLight)>();
    for (entity, light) in directionals.iter(world) {
        frame.add_light(Light::directional(entity.to_bits(), light));
    }

    let mut ambients = world.query::<(Entity, &AmbientLight)>();
    for (entity, light) in ambients.iter(world) {
        frame.add_light(Light::ambient(entity.to_bits(), light));
    }

    let mut emitters = world.query::<&ParticleEmitter>();
    for emitter in emitters.iter(world) {
        frame.add_particles(emitter.system.clone());
    }

    log::trace!(
        "Extracted scene: camera={} drawables={} lights={} particle systems={}",
        frame.camera.is_some(),
        frame.drawables.len(),
        frame.lights.len(),
        frame.particles.len()
    );
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::LightKind;
    use glam::Vec3;

    #[test]
    fn active_camera_preferred() {
        let mut world = World::new();
        world.spawn(Camera::new(Vec3::X, Vec3::ZERO));
        world.spawn((Camera::new(Vec3::Y, Vec3::ZERO), ActiveCamera));
        world.spawn(Camera::new(Vec3::Z, Vec3::ZERO));

        let frame = extract_scene(&mut world);
        assert_eq!(frame.camera.unwrap().position, Vec3::Y);
    }

    #[test]
    fn disabled_mesh_renderers_skipped() {
        use crate::backend::{DummyBackend, GraphicsBackend};
        use crate::resources::{GpuMesh, Material, Mesh};
        use std::sync::Arc;

        let backend: Arc<dyn GraphicsBackend> = Arc::new(DummyBackend::new());
        let mesh = Arc::new(GpuMesh::upload(&backend, &Mesh::cube()).unwrap());
        let material = Arc::new(Material::gold());

        let mut world = World::new();
        world.spawn((
            MeshRenderer::new(Arc::clone(&mesh), Arc::clone(&material)),
            Transform::from_position(Vec3::X),
        ));
        let mut hidden = MeshRenderer::new(mesh, material);
        hidden.enabled = false;
        world.spawn(hidden);

        let frame = extract_scene(&mut world);
        assert_eq!(frame.drawables.len(), 1);
        assert_eq!(frame.drawables[0].world.w_axis.truncate(), Vec3::X);
    }

    #[test]
    fn lights_take_position_from_transform() {
        let mut world = World::new();
        let entity = world
            .spawn((
                PointLight::default(),
                Transform::from_position(Vec3::new(1.0, 2.0, 3.0)),
            ))
            .id();
        world.spawn(AmbientLight::default());

        let frame = extract_scene(&mut world);
        assert!(frame.camera.is_none());
        assert_eq!(frame.lights.len(), 2);
        let point = frame
            .lights
            .iter()
            .find(|l| l.id == entity.to_bits())
            .unwrap();
        assert!(matches!(
            point.kind,
            LightKind::Point { position, .. } if position == Vec3::new(1.0, 2.0, 3.0)
        ));
    }
}
