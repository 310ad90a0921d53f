//! Flattened clump/mesh/analytical templates and the material table (§4.2).
//!
//! Clump templates are sorted ascending by component count so the smallest
//! may be embedded directly into generated kernels; a cumulative threshold
//! [`crate::constants::T_JIT`] caps how many components may be embedded.
//! Per Design Notes §9, the "sentinel offset means look in global memory"
//! pattern is expressed as a tagged [`ComponentRef`] rather than a magic
//! offset value.

use crate::constants::T_JIT;
use crate::error::Warning;
use std::collections::HashMap;

/// One sphere component of a clump template: local offset from the clump
/// center-of-mass, radius, and material index.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClumpComponent {
    pub offset: [f64; 3],
    pub radius: f64,
    pub material: MaterialHandle,
}

/// An ordered list of fused sphere components plus mass properties.
#[derive(Clone, Debug)]
pub struct ClumpTemplate {
    pub components: Vec<ClumpComponent>,
    pub mass: f64,
    /// Diagonal principal-frame inertia tensor.
    pub moi: [f64; 3],
    pub volume: f64,
}

/// Reference to a clump component as seen by a kernel: either baked into
/// generated kernel source at a small index, or read from a global-memory
/// array at runtime. The kernel branches on this tag once per component
/// rather than testing a sentinel offset value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ComponentRef {
    Embedded(u32),
    Spilled(u32),
}

/// One of the two analytical boundary shapes: an infinite plane or a
/// rectangular plate, attached to an owner with a relative pose.
#[derive(Clone, Debug)]
pub enum AnalyticalTemplate {
    Plane {
        relative_pos: [f64; 3],
        outward_normal: [f64; 3],
        material: MaterialHandle,
    },
    Plate {
        relative_pos: [f64; 3],
        normal: [f64; 3],
        half_extents: [f64; 2],
        material: MaterialHandle,
    },
}

/// A single mesh facet: three local vertex offsets plus its material.
#[derive(Copy, Clone, Debug)]
pub struct MeshFacet {
    pub vertices: [[f64; 3]; 3],
    pub material: MaterialHandle,
}

/// An ordered list of triangle facets. Analytical and mesh templates are
/// always spilled (§4.2 only discusses clump-component embedding) but are
/// still tracked here for a uniform accessor shape.
#[derive(Clone, Debug, Default)]
pub struct MeshTemplate {
    pub facets: Vec<MeshFacet>,
}

impl MeshTemplate {
    /// Builds a mesh template from raw triangle data, optionally flipping
    /// facet winding to match supplied vertex normals. `AddWavefrontMeshObject`
    /// (file I/O) is out of scope; callers that parsed a Wavefront file feed
    /// already-parsed triangles here.
    #[must_use]
    pub fn from_triangles(
        triangles: &[([f64; 3], [f64; 3], [f64; 3])],
        material: MaterialHandle,
        flip_to_match_normals: Option<&[[f64; 3]]>,
    ) -> Self {
        let mut facets = Vec::with_capacity(triangles.len());
        for (i, &(a, b, c)) in triangles.iter().enumerate() {
            let (a, b, c) = match flip_to_match_normals {
                Some(normals) if facet_needs_flip(a, b, c, normals[i]) => (a, c, b),
                _ => (a, b, c),
            };
            facets.push(MeshFacet {
                vertices: [a, b, c],
                material,
            });
        }
        Self { facets }
    }
}

fn facet_needs_flip(a: [f64; 3], b: [f64; 3], c: [f64; 3], supplied_normal: [f64; 3]) -> bool {
    let u = sub(b, a);
    let v = sub(c, a);
    let computed = cross(u, v);
    dot(computed, supplied_normal) < 0.0
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}
fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
}
fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Opaque handle to a material loaded into the [`TemplateStore`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub u32);

/// Opaque handle to a clump template loaded into the [`TemplateStore`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClumpTemplateHandle(pub u32);

/// Materials are stored as parallel arrays, one per declared property name.
/// When a material omits a required property the store substitutes `0` and
/// issues a warning if the active force law declared that property required.
#[derive(Default)]
pub struct MaterialTable {
    properties: HashMap<String, Vec<f64>>,
    /// Parallel to `properties`: `true` at `[name][idx]` iff material `idx`
    /// actually supplied `name` to `load`, rather than having it padded in as
    /// a substituted `0`. Needed because a material can also genuinely supply
    /// `0.0`, which a value-based check can't tell apart from an omission.
    provided: HashMap<String, Vec<bool>>,
    count: u32,
}

impl MaterialTable {
    pub fn load(&mut self, props: &HashMap<String, f64>) -> MaterialHandle {
        let handle = MaterialHandle(self.count);
        for (name, value) in props {
            let column = self.properties.entry(name.clone()).or_insert_with(Vec::new);
            let supplied = self.provided.entry(name.clone()).or_insert_with(Vec::new);
            while column.len() < self.count as usize {
                column.push(0.0);
                supplied.push(false);
            }
            column.push(*value);
            supplied.push(true);
        }
        self.count += 1;
        // Any property column not touched by this material falls behind; pad it now.
        for (name, column) in &mut self.properties {
            let supplied = self.provided.entry(name.clone()).or_insert_with(Vec::new);
            while column.len() < self.count as usize {
                column.push(0.0);
                supplied.push(false);
            }
        }
        handle
    }

    #[must_use]
    pub fn get(&self, material: MaterialHandle, property: &str) -> f64 {
        self.properties
            .get(property)
            .and_then(|col| col.get(material.0 as usize))
            .copied()
            .unwrap_or(0.0)
    }

    #[must_use]
    pub fn has_property(&self, property: &str) -> bool {
        self.properties.contains_key(property)
    }

    /// Validates every loaded material against the force law's required
    /// property names, returning one warning per (material, property) gap.
    #[must_use]
    pub fn validate_required(&self, required: &[&str]) -> Vec<Warning> {
        let mut warnings = Vec::new();
        for &name in required {
            let Some(supplied) = self.provided.get(name) else {
                warnings.push(Warning::new(format!(
                    "material property '{name}' is required by the force law but was never supplied by any material; substituting 0"
                )));
                continue;
            };
            for (idx, &was_supplied) in supplied.iter().enumerate() {
                if !was_supplied {
                    warnings.push(Warning::new(format!(
                        "material {idx} lacks required property '{name}'; substituting 0"
                    )));
                }
            }
        }
        warnings
    }
}

/// Flattened clump/mesh/analytical templates plus the material table,
/// immutable after the first [`crate::solver::DemSolver::initialize`] call.
#[derive(Default)]
pub struct TemplateStore {
    pub materials: MaterialTable,
    clumps: Vec<ClumpTemplate>,
    /// Order clump templates are visited in once sorted ascending by
    /// component count, so the smallest may be embedded.
    embedding_order: Vec<u32>,
    cumulative_embedded: usize,
    pub analytical: Vec<AnalyticalTemplate>,
    pub meshes: Vec<MeshTemplate>,
}

impl TemplateStore {
    pub fn load_clump_type(&mut self, template: ClumpTemplate) -> ClumpTemplateHandle {
        let handle = ClumpTemplateHandle(self.clumps.len() as u32);
        self.clumps.push(template);
        handle
    }

    #[must_use]
    pub fn clump(&self, handle: ClumpTemplateHandle) -> &ClumpTemplate {
        &self.clumps[handle.0 as usize]
    }

    /// Sorts clump templates ascending by component count and computes the
    /// embedded/spilled split against [`T_JIT`]. Idempotent; called once at
    /// `initialize()`.
    pub fn finalize_embedding(&mut self) {
        let mut order: Vec<u32> = (0..self.clumps.len() as u32).collect();
        order.sort_by_key(|&i| self.clumps[i as usize].components.len());
        let mut cumulative = 0usize;
        let mut cutoff = order.len();
        for (rank, &idx) in order.iter().enumerate() {
            let next = cumulative + self.clumps[idx as usize].components.len();
            if next > T_JIT {
                cutoff = rank;
                break;
            }
            cumulative = next;
        }
        self.cumulative_embedded = cumulative;
        self.embedding_order = order;
        let _ = cutoff; // recorded implicitly via component_ref's rank lookup below
    }

    /// The tagged reference a kernel should use for `template`'s components:
    /// `Embedded` if the template falls within the cumulative `T_JIT`
    /// component budget once templates are visited smallest-first,
    /// `Spilled` otherwise.
    #[must_use]
    pub fn component_ref(&self, handle: ClumpTemplateHandle) -> ComponentRef {
        let rank = self
            .embedding_order
            .iter()
            .position(|&i| i == handle.0)
            .unwrap_or(usize::MAX);
        let mut cumulative = 0usize;
        for (r, &idx) in self.embedding_order.iter().enumerate() {
            let count = self.clumps[idx as usize].components.len();
            if r == rank {
                return if cumulative + count <= T_JIT {
                    ComponentRef::Embedded(handle.0)
                } else {
                    ComponentRef::Spilled(handle.0)
                };
            }
            cumulative += count;
        }
        ComponentRef::Spilled(handle.0)
    }

    pub fn add_analytical(&mut self, template: AnalyticalTemplate) -> u32 {
        self.analytical.push(template);
        self.analytical.len() as u32 - 1
    }

    pub fn add_mesh(&mut self, template: MeshTemplate) -> u32 {
        self.meshes.push(template);
        self.meshes.len() as u32 - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_sphere_clump(radius: f64) -> ClumpTemplate {
        ClumpTemplate {
            components: vec![ClumpComponent { offset: [0.0; 3], radius, material: MaterialHandle(0) }],
            mass: 1.0,
            moi: [1.0, 1.0, 1.0],
            volume: 1.0,
        }
    }

    #[test]
    fn small_templates_embed_large_templates_spill() {
        let mut store = TemplateStore::default();
        let small = store.load_clump_type(single_sphere_clump(0.1));
        let mut big = single_sphere_clump(0.1);
        big.components = (0..200).map(|_| big.components[0]).collect();
        let big_handle = store.load_clump_type(big);
        store.finalize_embedding();
        assert_eq!(store.component_ref(small), ComponentRef::Embedded(small.0));
        assert_eq!(store.component_ref(big_handle), ComponentRef::Spilled(big_handle.0));
    }

    #[test]
    fn material_table_pads_missing_properties_with_zero() {
        let mut table = MaterialTable::default();
        let mut props = HashMap::new();
        props.insert("E".to_string(), 1e9);
        table.load(&props);
        let mut props2 = HashMap::new();
        props2.insert("nu".to_string(), 0.3);
        let handle2 = table.load(&props2);
        assert_eq!(table.get(handle2, "E"), 0.0);
        assert_eq!(table.get(handle2, "nu"), 0.3);
    }

    #[test]
    fn validate_required_flags_one_material_omitting_a_property_others_supply() {
        let mut table = MaterialTable::default();
        let mut steel = HashMap::new();
        steel.insert("E".to_string(), 2e11);
        table.load(&steel);
        let rubber = HashMap::new();
        table.load(&rubber);

        let warnings = table.validate_required(&["E"]);
        assert_eq!(warnings.len(), 1, "only the material that omitted 'E' should warn");
        assert!(warnings[0].0.contains("material 1"));
    }

    #[test]
    fn validate_required_accepts_a_genuinely_supplied_zero() {
        let mut table = MaterialTable::default();
        let mut props = HashMap::new();
        props.insert("CoR".to_string(), 0.0);
        table.load(&props);

        assert!(table.validate_required(&["CoR"]).is_empty());
    }

    #[test]
    fn mesh_flips_facets_to_match_supplied_normals() {
        let tri = [([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0])];
        let normals = [[0.0, 0.0, -1.0]]; // opposite of the natural (0,0,1) winding
        let mesh = MeshTemplate::from_triangles(&tri, MaterialHandle(0), Some(&normals));
        assert_eq!(mesh.facets[0].vertices, [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
    }
}
