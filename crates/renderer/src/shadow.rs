//! Shadow-map pool, light-space projections and percentage-closer filtering.
//!
//! The pool is a single depth array of `capacity × 6` layers. Slot `s` owns
//! layers `s*6 .. s*6+6`; directional, spot and area lights only use the first.
//! Allocation is recomputed every frame in light order, so the first
//! `capacity` shadow-casting lights always receive slots 0.. in order and the
//! rest render unshadowed.

use crate::light::{Light, LightType, ShadowProjectionKind, ShadowSettings};
use crate::resources::{TargetFormat, TextureDesc};
use engine_core::Aabb;
use glam::{Mat4, Vec3, Vec4Swizzles};

pub const CUBE_FACE_COUNT: u32 = 6;

/// Near plane for perspective shadow frusta.
const SHADOW_NEAR: f32 = 0.05;
/// Field of view used for area-light shadows.
const AREA_SHADOW_FOV_DEGREES: f32 = 120.0;

/// Light-space transform(s) for one shadowed light.
#[derive(Debug, Clone, PartialEq)]
pub enum ShadowProjection {
    Orthographic(Mat4),
    Perspective(Mat4),
    /// One view-projection per cube face, +X -X +Y -Y +Z -Z.
    Cube([Mat4; 6]),
}

impl ShadowProjection {
    pub fn matrices(&self) -> &[Mat4] {
        match self {
            ShadowProjection::Orthographic(m) | ShadowProjection::Perspective(m) => std::slice::from_ref(m),
            ShadowProjection::Cube(faces) => faces,
        }
    }

    pub fn kind(&self) -> ShadowProjectionKind {
        match self {
            ShadowProjection::Orthographic(_) => ShadowProjectionKind::Orthographic,
            ShadowProjection::Perspective(_) => ShadowProjectionKind::Perspective,
            ShadowProjection::Cube(_) => ShadowProjectionKind::Cube,
        }
    }
}

/// A light that received a pool slot this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowAssignment {
    /// Index into the frame's light list.
    pub light_index: usize,
    pub slot: u32,
    pub projection: ShadowProjection,
    pub settings: ShadowSettings,
    pub light_position: Vec3,
}

impl ShadowAssignment {
    /// Face of the projection that covers `position` (always 0 for 2D maps).
    pub fn face_for(&self, position: Vec3) -> u32 {
        match self.projection {
            ShadowProjection::Cube(_) => cube_face_for_direction(position - self.light_position),
            _ => 0,
        }
    }

    /// Atlas layer and light-space matrix for a world position.
    pub fn lookup(&self, position: Vec3) -> (u32, Mat4) {
        let face = self.face_for(position);
        let m = self.projection.matrices()[face as usize];
        (self.slot * CUBE_FACE_COUNT + face, m)
    }
}

/// Result of one frame's pool allocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShadowAllocation {
    pub assignments: Vec<ShadowAssignment>,
    /// Shadow-casting lights that did not fit in the pool.
    pub unshadowed: Vec<usize>,
}

impl ShadowAllocation {
    pub fn for_light(&self, light_index: usize) -> Option<&ShadowAssignment> {
        self.assignments.iter().find(|a| a.light_index == light_index)
    }

    /// Number of depth renders (one per face).
    pub fn face_count(&self) -> usize {
        self.assignments.iter().map(|a| a.projection.matrices().len()).sum()
    }
}

/// Bounded, size-independent pool of shadow maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowMapPool {
    capacity: u32,
    resolution: u32,
}

impl ShadowMapPool {
    pub fn new(capacity: u32, resolution: u32) -> Self {
        Self {
            capacity,
            resolution: resolution.max(1),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Layers in the depth atlas. At least one, so an empty pool still has a texture to bind.
    pub fn layer_count(&self) -> u32 {
        (self.capacity * CUBE_FACE_COUNT).max(1)
    }

    pub fn atlas_desc(&self) -> TextureDesc {
        TextureDesc {
            label: String::from("Shadow Atlas"),
            width: self.resolution,
            height: self.resolution,
            layers: self.layer_count(),
            array: true,
            format: TargetFormat::Depth32Float,
        }
    }

    /// Hand out slots to the first `capacity` lights that want shadows.
    pub fn allocate(&self, lights: &[Light], scene_bounds: &Aabb) -> ShadowAllocation {
        let mut allocation = ShadowAllocation::default();
        for (index, light) in lights.iter().enumerate() {
            if !light.wants_shadow() {
                continue;
            }
            let slot = allocation.assignments.len() as u32;
            if slot >= self.capacity {
                allocation.unshadowed.push(index);
                continue;
            }
            if let Some(projection) = light_projection(light, scene_bounds) {
                allocation.assignments.push(ShadowAssignment {
                    light_index: index,
                    slot,
                    projection,
                    settings: light.shadow,
                    light_position: light.position,
                });
            }
        }
        allocation
    }
}

/// Light-space projection for a light, or `None` for types that never cast.
pub fn light_projection(light: &Light, scene_bounds: &Aabb) -> Option<ShadowProjection> {
    let far = light.range.max(SHADOW_NEAR + 1.0);
    match light.light_type.shadow_projection()? {
        ShadowProjectionKind::Orthographic => {
            Some(ShadowProjection::Orthographic(directional_light_matrix(light.direction, scene_bounds)))
        }
        ShadowProjectionKind::Perspective => {
            let fov = if light.light_type == LightType::Area {
                AREA_SHADOW_FOV_DEGREES
            } else {
                light.spot.shadow_fov_degrees()
            };
            Some(ShadowProjection::Perspective(perspective_light_matrix(
                light.position,
                light.direction,
                fov,
                far,
            )))
        }
        ShadowProjectionKind::Cube => Some(ShadowProjection::Cube(point_light_faces(light.position, far))),
    }
}

fn up_for(direction: Vec3) -> Vec3 {
    if direction.y.abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// Orthographic projection looking along `direction` that encloses `bounds`.
pub fn directional_light_matrix(direction: Vec3, bounds: &Aabb) -> Mat4 {
    let bounds = if bounds.is_empty() {
        Aabb::new(Vec3::splat(-1.0), Vec3::ONE)
    } else {
        *bounds
    };
    let dir = direction.try_normalize().unwrap_or(Vec3::NEG_Y);
    let center = bounds.center();
    let radius = bounds.half_extents().length().max(0.01);
    let eye = center - dir * (radius * 2.0);
    let view = Mat4::look_at_rh(eye, center, up_for(dir));
    let proj = Mat4::orthographic_rh(-radius, radius, -radius, radius, radius * 0.5, radius * 3.5);
    proj * view
}

/// Perspective projection for spot and area lights.
pub fn perspective_light_matrix(position: Vec3, direction: Vec3, fov_degrees: f32, far: f32) -> Mat4 {
    let dir = direction.try_normalize().unwrap_or(Vec3::NEG_Y);
    let view = Mat4::look_at_rh(position, position + dir, up_for(dir));
    let proj = Mat4::perspective_rh(fov_degrees.to_radians(), 1.0, SHADOW_NEAR, far);
    proj * view
}

/// Six 90° view-projections around a point light.
pub fn point_light_faces(position: Vec3, far: f32) -> [Mat4; 6] {
    let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, SHADOW_NEAR, far);
    let faces = [
        (Vec3::X, Vec3::NEG_Y),
        (Vec3::NEG_X, Vec3::NEG_Y),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::NEG_Z),
        (Vec3::Z, Vec3::NEG_Y),
        (Vec3::NEG_Z, Vec3::NEG_Y),
    ];
    faces.map(|(dir, up)| proj * Mat4::look_at_rh(position, position + dir, up))
}

/// Cube face index for a direction from the light, by major axis.
pub fn cube_face_for_direction(d: Vec3) -> u32 {
    let a = d.abs();
    if a.x >= a.y && a.x >= a.z {
        if d.x >= 0.0 {
            0
        } else {
            1
        }
    } else if a.y >= a.z {
        if d.y >= 0.0 {
            2
        } else {
            3
        }
    } else if d.z >= 0.0 {
        4
    } else {
        5
    }
}

/// Read access to a layered depth map.
pub trait DepthLookup {
    fn resolution(&self) -> u32;

    /// Stored depth at a texel, clamped to the map edge.
    fn depth_at(&self, layer: u32, x: i32, y: i32) -> f32;
}

/// 3×3 percentage-closer filter. Returns 0 (lit) .. 1 (fully shadowed).
///
/// Positions outside the light frustum, or beyond its far plane, are lit.
pub fn pcf_shadow(
    map: &dyn DepthLookup,
    layer: u32,
    light_view_proj: &Mat4,
    position: Vec3,
    bias: f32,
    softness: f32,
) -> f32 {
    let clip = *light_view_proj * position.extend(1.0);
    if clip.w <= 0.0 {
        return 0.0;
    }
    let ndc = clip.xyz() / clip.w;
    if ndc.z > 1.0 || ndc.z < 0.0 {
        return 0.0;
    }
    let u = ndc.x * 0.5 + 0.5;
    let v = 0.5 - ndc.y * 0.5;
    if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
        return 0.0;
    }

    let res = map.resolution() as f32;
    let spread = softness.max(0.0);
    let reference = ndc.z - bias;
    let mut shadowed = 0.0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let x = ((u * res) + dx as f32 * spread).floor() as i32;
            let y = ((v * res) + dy as f32 * spread).floor() as i32;
            if reference > map.depth_at(layer, x, y) {
                shadowed += 1.0;
            }
        }
    }
    shadowed / 9.0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatDepth {
        depth: f32,
    }

    impl DepthLookup for FlatDepth {
        fn resolution(&self) -> u32 {
            64
        }

        fn depth_at(&self, _layer: u32, _x: i32, _y: i32) -> f32 {
            self.depth
        }
    }

    fn casters(n: usize) -> Vec<Light> {
        (0..n)
            .map(|i| Light::point(Vec3::new(i as f32, 5.0, 0.0), Vec3::ONE, 100.0).named(format!("p{i}")))
            .collect()
    }

    #[test]
    fn first_casters_get_slots_in_order() {
        let mut lights = casters(5);
        lights[1].casts_shadows = false;
        let pool = ShadowMapPool::new(2, 256);
        let bounds = Aabb::new(Vec3::splat(-1.0), Vec3::ONE);
        let alloc = pool.allocate(&lights, &bounds);

        let slots: Vec<(usize, u32)> = alloc.assignments.iter().map(|a| (a.light_index, a.slot)).collect();
        assert_eq!(slots, vec![(0, 0), (2, 1)]);
        assert_eq!(alloc.unshadowed, vec![3, 4]);
        assert!(alloc.for_light(1).is_none());
    }

    #[test]
    fn allocation_is_stable_across_calls() {
        let lights = casters(4);
        let pool = ShadowMapPool::new(3, 256);
        let bounds = Aabb::new(Vec3::splat(-2.0), Vec3::splat(2.0));
        let first = pool.allocate(&lights, &bounds);
        for _ in 0..10 {
            assert_eq!(pool.allocate(&lights, &bounds), first);
        }
    }

    #[test]
    fn zero_capacity_pool_leaves_everything_unshadowed() {
        let pool = ShadowMapPool::new(0, 128);
        let alloc = pool.allocate(&casters(2), &Aabb::EMPTY);
        assert!(alloc.assignments.is_empty());
        assert_eq!(alloc.unshadowed, vec![0, 1]);
        assert_eq!(pool.layer_count(), 1);
        assert_eq!(pool.atlas_desc().view_dimension(), wgpu::TextureViewDimension::D2Array);
    }

    #[test]
    fn spot_shadow_uses_perspective_with_twice_outer_angle() {
        let spot = Light::spot(Vec3::new(0.0, 5.0, 0.0), Vec3::NEG_Y, Vec3::ONE, 500.0)
            .with_spot_angles(20.0, 40.0)
            .with_range(20.0);
        let projection = light_projection(&spot, &Aabb::EMPTY);
        let expected = perspective_light_matrix(spot.position, spot.direction, 80.0, 20.0);
        assert_eq!(projection, Some(ShadowProjection::Perspective(expected)));
    }

    #[test]
    fn point_light_gets_six_faces() {
        let light = Light::point(Vec3::ZERO, Vec3::ONE, 100.0);
        let projection = light_projection(&light, &Aabb::EMPTY);
        assert!(matches!(projection, Some(ShadowProjection::Cube(_))));
    }

    #[test]
    fn cube_face_selection_follows_major_axis() {
        assert_eq!(cube_face_for_direction(Vec3::new(2.0, 1.0, 0.5)), 0);
        assert_eq!(cube_face_for_direction(Vec3::new(0.0, -3.0, 1.0)), 3);
        assert_eq!(cube_face_for_direction(Vec3::new(0.1, 0.2, -1.0)), 5);
    }

    #[test]
    fn directional_projection_keeps_scene_inside_depth_range() {
        let bounds = Aabb::new(Vec3::new(-3.0, 0.0, -3.0), Vec3::new(3.0, 2.0, 3.0));
        let m = directional_light_matrix(Vec3::new(-1.0, -1.0, 0.0), &bounds);
        for corner in bounds.corners() {
            let clip = m * corner.extend(1.0);
            let ndc = clip.xyz() / clip.w;
            assert!(ndc.x.abs() <= 1.0 + 1e-4 && ndc.y.abs() <= 1.0 + 1e-4);
            assert!(ndc.z >= 0.0 && ndc.z <= 1.0);
        }
    }

    #[test]
    fn pcf_is_lit_when_occluder_is_behind_receiver() {
        let m = directional_light_matrix(Vec3::NEG_Y, &Aabb::new(Vec3::splat(-1.0), Vec3::ONE));
        let far_occluder = FlatDepth { depth: 1.0 };
        assert_eq!(pcf_shadow(&far_occluder, 0, &m, Vec3::ZERO, 0.005, 1.0), 0.0);
        let near_occluder = FlatDepth { depth: 0.0 };
        assert_eq!(pcf_shadow(&near_occluder, 0, &m, Vec3::ZERO, 0.005, 1.0), 1.0);
    }

    #[test]
    fn pcf_outside_light_frustum_is_lit() {
        let m = directional_light_matrix(Vec3::NEG_Y, &Aabb::new(Vec3::splat(-1.0), Vec3::ONE));
        let occluder = FlatDepth { depth: 0.0 };
        assert_eq!(pcf_shadow(&occluder, 0, &m, Vec3::new(50.0, 0.0, 0.0), 0.005, 1.0), 0.0);
    }
}
