//! What the pipeline consumes from the outside world.
//!
//! Objects opt into rendering by implementing [`Renderable`]; the orchestrator
//! never inspects anything else about them.

use crate::light::Light;
use crate::material::Material;
use crate::resources::MeshHandle;
use engine_core::Transform;
use glam::{Mat4, Vec3};
use std::sync::Arc;

/// Capability marker for anything the geometry pass can draw.
pub trait Renderable {
    /// Uploaded geometry, or `None` for objects that have nothing to draw yet.
    fn mesh(&self) -> Option<MeshHandle>;

    /// Surface description; `None` uses the default material.
    fn material(&self) -> Option<&Arc<Material>>;

    fn world_transform(&self) -> Mat4;

    fn is_visible(&self) -> bool {
        true
    }

    fn casts_shadows(&self) -> bool {
        true
    }
}

/// Source of objects and lights for one frame.
pub trait SceneView {
    fn objects(&self) -> Box<dyn Iterator<Item = &dyn Renderable> + '_>;

    fn lights(&self) -> &[Light];
}

/// Camera matrices the passes need.
pub trait CameraView {
    fn view_matrix(&self) -> Mat4;

    fn projection_matrix(&self) -> Mat4;

    fn position(&self) -> Vec3;
}

/// A plain object record for simple scenes and tests.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub name: String,
    pub mesh: Option<MeshHandle>,
    pub material: Option<Arc<Material>>,
    pub transform: Transform,
    pub visible: bool,
    pub casts_shadows: bool,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, mesh: MeshHandle, material: Arc<Material>) -> Self {
        Self {
            name: name.into(),
            mesh: Some(mesh),
            material: Some(material),
            transform: Transform::default(),
            visible: true,
            casts_shadows: true,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

impl Renderable for SceneObject {
    fn mesh(&self) -> Option<MeshHandle> {
        self.mesh
    }

    fn material(&self) -> Option<&Arc<Material>> {
        self.material.as_ref()
    }

    fn world_transform(&self) -> Mat4 {
        self.transform.to_matrix()
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn casts_shadows(&self) -> bool {
        self.casts_shadows
    }
}

/// Ordered collection of objects and lights.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub objects: Vec<SceneObject>,
    pub lights: Vec<Light>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, object: SceneObject) -> usize {
        self.objects.push(object);
        self.objects.len() - 1
    }

    pub fn add_light(&mut self, light: Light) -> usize {
        self.lights.push(light);
        self.lights.len() - 1
    }
}

impl SceneView for Scene {
    fn objects(&self) -> Box<dyn Iterator<Item = &dyn Renderable> + '_> {
        Box::new(self.objects.iter().map(|o| o as &dyn Renderable))
    }

    fn lights(&self) -> &[Light] {
        &self.lights
    }
}
