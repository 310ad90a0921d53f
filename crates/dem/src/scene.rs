//! Scene state: the owner arrays that are written by dT integration and read
//! back (via an explicit sync) by the driver between productions (§4.3).

use crate::constants::W_MAX;
use crate::spatial::{SpatialAddress, VoxelLayout};
use crate::template::ClumpTemplateHandle;

/// What kind of body an owner is. Clump owners carry one or more fused
/// sphere components; analytical and mesh owners carry a single boundary
/// shape and never participate in broad-phase as "movers" unless unfixed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OwnerKind {
    Clump(ClumpTemplateHandle),
    Analytical(u32),
    Mesh(u32),
}

/// A unit quaternion, `(w, x, y, z)`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Quaternion(pub [f64; 4]);

impl Default for Quaternion {
    fn default() -> Self {
        Self([1.0, 0.0, 0.0, 0.0])
    }
}

impl Quaternion {
    #[must_use]
    pub fn normalized(&self) -> Self {
        let n = (self.0[0] * self.0[0] + self.0[1] * self.0[1] + self.0[2] * self.0[2] + self.0[3] * self.0[3]).sqrt();
        if n == 0.0 {
            return Self::default();
        }
        Self([self.0[0] / n, self.0[1] / n, self.0[2] / n, self.0[3] / n])
    }

    /// Rotates `v` by this quaternion (`q * v * q⁻¹`, via the standard
    /// two-cross-product expansion). Used to carry clump-component offsets
    /// and mesh-facet geometry from local into world space (§4.1).
    #[must_use]
    pub fn rotate_vector(&self, v: [f64; 3]) -> [f64; 3] {
        let [w, x, y, z] = self.0;
        let u = [x, y, z];
        let uv = cross(u, v);
        let uuv = cross(u, uv);
        [
            v[0] + 2.0 * (w * uv[0] + uuv[0]),
            v[1] + 2.0 * (w * uv[1] + uuv[1]),
            v[2] + 2.0 * (w * uv[2] + uuv[2]),
        ]
    }
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
}

/// Per-owner state kept by the scene. Position is stored as a
/// [`SpatialAddress`] rather than a bare `f64` triple so the broad-phase can
/// consume it without a further conversion step.
#[derive(Clone)]
pub struct Owner {
    pub kind: OwnerKind,
    pub pos: SpatialAddress,
    pub ori: Quaternion,
    pub vel: [f64; 3],
    pub ang_vel: [f64; 3],
    pub acc: [f64; 3],
    pub ang_acc: [f64; 3],
    pub family: u32,
    pub wildcards: [f64; W_MAX],
}

/// Owner arrays plus the voxel layout they are addressed against. A
/// `dirty` flag models the "sync on read" rule from the concurrency
/// design: accessors called between productions force a sync of the latest
/// dT-produced buffer before returning, rather than reading a stale copy.
pub struct SceneState {
    pub layout: VoxelLayout,
    owners: Vec<Owner>,
    dirty: bool,
}

impl SceneState {
    #[must_use]
    pub fn new(layout: VoxelLayout) -> Self {
        Self {
            layout,
            owners: Vec::new(),
            dirty: false,
        }
    }

    pub fn add_owner(&mut self, owner: Owner) -> u32 {
        self.owners.push(owner);
        self.owners.len() as u32 - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    #[must_use]
    pub fn owners(&self) -> &[Owner] {
        &self.owners
    }

    pub fn owners_mut(&mut self) -> &mut [Owner] {
        &mut self.owners
    }

    /// Marks the owner array as having been touched by dT integration since
    /// the last accessor call. The next `get_owner_*` call will observe it.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clears the dirty flag, modeling a completed sync. Called by the
    /// coordinator once it has copied the freshest dT buffer into this
    /// state.
    pub fn mark_synced(&mut self) {
        self.dirty = false;
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn get_owner_pos(&self, owner: u32) -> [f64; 3] {
        self.owners[owner as usize].pos.to_physical(&self.layout)
    }

    pub fn set_owner_pos(&mut self, owner: u32, pos: [f64; 3]) {
        self.owners[owner as usize].pos = SpatialAddress::from_physical(&self.layout, pos);
    }

    #[must_use]
    pub fn get_owner_ori_q(&self, owner: u32) -> Quaternion {
        self.owners[owner as usize].ori
    }

    pub fn set_owner_ori_q(&mut self, owner: u32, ori: Quaternion) {
        self.owners[owner as usize].ori = ori.normalized();
    }

    #[must_use]
    pub fn get_owner_vel(&self, owner: u32) -> [f64; 3] {
        self.owners[owner as usize].vel
    }

    pub fn set_owner_vel(&mut self, owner: u32, vel: [f64; 3]) {
        self.owners[owner as usize].vel = vel;
    }

    #[must_use]
    pub fn get_owner_ang_vel(&self, owner: u32) -> [f64; 3] {
        self.owners[owner as usize].ang_vel
    }

    pub fn set_owner_ang_vel(&mut self, owner: u32, w: [f64; 3]) {
        self.owners[owner as usize].ang_vel = w;
    }

    #[must_use]
    pub fn get_owner_acc(&self, owner: u32) -> [f64; 3] {
        self.owners[owner as usize].acc
    }

    pub fn set_owner_acc(&mut self, owner: u32, acc: [f64; 3]) {
        self.owners[owner as usize].acc = acc;
    }

    #[must_use]
    pub fn get_owner_ang_acc(&self, owner: u32) -> [f64; 3] {
        self.owners[owner as usize].ang_acc
    }

    pub fn set_owner_ang_acc(&mut self, owner: u32, ang_acc: [f64; 3]) {
        self.owners[owner as usize].ang_acc = ang_acc;
    }

    #[must_use]
    pub fn get_owner_family(&self, owner: u32) -> u32 {
        self.owners[owner as usize].family
    }

    /// `changeFamily`: moves an owner to a new family, effective for the
    /// next broad-phase production.
    pub fn change_family(&mut self, owner: u32, family: u32) {
        self.owners[owner as usize].family = family;
    }

    #[must_use]
    pub fn get_owner_wildcard(&self, owner: u32, slot: usize) -> f64 {
        self.owners[owner as usize].wildcards[slot]
    }

    pub fn set_owner_wildcard(&mut self, owner: u32, slot: usize, value: f64) {
        self.owners[owner as usize].wildcards[slot] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::figure_out_nv;

    fn fresh_scene() -> SceneState {
        SceneState::new(figure_out_nv([10.0, 10.0, 10.0], None).unwrap())
    }

    fn dummy_owner(layout: &VoxelLayout, pos: [f64; 3]) -> Owner {
        Owner {
            kind: OwnerKind::Clump(ClumpTemplateHandle(0)),
            pos: SpatialAddress::from_physical(layout, pos),
            ori: Quaternion::default(),
            vel: [0.0; 3],
            ang_vel: [0.0; 3],
            acc: [0.0; 3],
            ang_acc: [0.0; 3],
            family: 0,
            wildcards: [0.0; W_MAX],
        }
    }

    #[test]
    fn position_round_trips_through_accessors() {
        let mut scene = fresh_scene();
        let layout = scene.layout;
        let id = scene.add_owner(dummy_owner(&layout, [1.0, 2.0, 3.0]));
        scene.set_owner_pos(id, [4.0, 5.0, 6.0]);
        let got = scene.get_owner_pos(id);
        for axis in 0..3 {
            assert!((got[axis] - [4.0, 5.0, 6.0][axis]).abs() <= layout.l * 2.0);
        }
    }

    #[test]
    fn rotate_vector_by_identity_is_a_no_op() {
        let v = [1.0, 2.0, 3.0];
        assert_eq!(Quaternion::default().rotate_vector(v), v);
    }

    #[test]
    fn rotate_vector_by_quarter_turn_about_z() {
        // 90 degrees about +Z: (w, x, y, z) = (cos45, 0, 0, sin45).
        let half = std::f64::consts::FRAC_PI_4;
        let q = Quaternion([half.cos(), 0.0, 0.0, half.sin()]);
        let rotated = q.rotate_vector([1.0, 0.0, 0.0]);
        assert!((rotated[0]).abs() < 1e-9);
        assert!((rotated[1] - 1.0).abs() < 1e-9);
        assert!((rotated[2]).abs() < 1e-9);
    }

    #[test]
    fn orientation_setter_normalizes() {
        let mut scene = fresh_scene();
        let layout = scene.layout;
        let id = scene.add_owner(dummy_owner(&layout, [0.0; 3]));
        scene.set_owner_ori_q(id, Quaternion([2.0, 0.0, 0.0, 0.0]));
        let q = scene.get_owner_ori_q(id).0;
        let n: f64 = q.iter().map(|v| v * v).sum();
        assert!((n - 1.0).abs() < 1e-9);
    }

    #[test]
    fn change_family_is_visible_immediately_to_accessors() {
        let mut scene = fresh_scene();
        let layout = scene.layout;
        let id = scene.add_owner(dummy_owner(&layout, [0.0; 3]));
        scene.change_family(id, 7);
        assert_eq!(scene.get_owner_family(id), 7);
    }

    #[test]
    fn dirty_flag_tracks_mark_and_sync() {
        let mut scene = fresh_scene();
        assert!(!scene.is_dirty());
        scene.mark_dirty();
        assert!(scene.is_dirty());
        scene.mark_synced();
        assert!(!scene.is_dirty());
    }
}
