use super::narrow_phase_sphere_contacts::ContactCandidate;
use crate::{BufferView, ComputeError};
use std::collections::HashMap;

/// Sentinel written for a new contact with no match in the previous step's list.
pub const NULL_MAPPING: u32 = u32::MAX;

/// Builds a lookup from `(idA, idB, contact_type)` to its position in `prev`.
fn index_prev(prev: &[ContactCandidate]) -> HashMap<(u32, u32, u32), u32> {
    prev.iter()
        .enumerate()
        .map(|(i, c)| ((c.id_a, c.id_b, c.contact_type), i as u32))
        .collect()
}

pub fn handle_map_contact_history(binds: &[BufferView]) -> Result<Vec<Vec<u8>>, ComputeError> {
    if binds.len() < 3 {
        return Err(ComputeError::ShapeMismatch(
            "MapContactHistory kernel expects 3 buffers",
        ));
    }
    let prev_view = &binds[0];
    let new_view = &binds[1];

    if prev_view.element_size_in_bytes != std::mem::size_of::<ContactCandidate>()
        || new_view.element_size_in_bytes != std::mem::size_of::<ContactCandidate>()
    {
        return Err(ComputeError::ShapeMismatch(
            "MapContactHistory expects ContactCandidate-sized elements",
        ));
    }

    let prev: &[ContactCandidate] = bytemuck::cast_slice(&prev_view.data);
    let new: &[ContactCandidate] = bytemuck::cast_slice(&new_view.data);
    let prev_index = index_prev(prev);

    let mapping: Vec<u32> = new
        .iter()
        .map(|c| {
            prev_index
                .get(&(c.id_a, c.id_b, c.contact_type))
                .copied()
                .unwrap_or(NULL_MAPPING)
        })
        .collect();

    Ok(vec![bytemuck::cast_slice(&mapping).to_vec()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferView, ComputeBackend, CpuBackend, Kernel};
    use std::sync::Arc;

    fn candidate(a: u32, b: u32) -> ContactCandidate {
        ContactCandidate { id_a: a, id_b: b, contact_type: 0, _pad: 0 }
    }

    #[test]
    fn identical_lists_map_to_the_identity() {
        let prev = vec![candidate(0, 1), candidate(2, 3)];
        let new = prev.clone();

        let cpu = CpuBackend::new();
        let prev_bytes: Arc<[u8]> = bytemuck::cast_slice(&prev).to_vec().into();
        let prev_view = BufferView::new(prev_bytes, vec![prev.len()], std::mem::size_of::<ContactCandidate>());
        let new_bytes: Arc<[u8]> = bytemuck::cast_slice(&new).to_vec().into();
        let new_view = BufferView::new(new_bytes, vec![new.len()], std::mem::size_of::<ContactCandidate>());
        let out_view = BufferView::new(Arc::from(Vec::<u8>::new()), vec![0], 4);

        let result = cpu
            .dispatch(&Kernel::MapContactHistory, &[prev_view, new_view, out_view], [1, 1, 1])
            .expect("dispatch failed");
        let mapping: &[u32] = bytemuck::cast_slice(&result[0]);
        assert_eq!(mapping, &[0, 1]);
    }

    #[test]
    fn a_contact_absent_from_the_previous_list_maps_to_null() {
        let prev = vec![candidate(0, 1)];
        let new = vec![candidate(0, 1), candidate(4, 5)];

        let cpu = CpuBackend::new();
        let prev_bytes: Arc<[u8]> = bytemuck::cast_slice(&prev).to_vec().into();
        let prev_view = BufferView::new(prev_bytes, vec![prev.len()], std::mem::size_of::<ContactCandidate>());
        let new_bytes: Arc<[u8]> = bytemuck::cast_slice(&new).to_vec().into();
        let new_view = BufferView::new(new_bytes, vec![new.len()], std::mem::size_of::<ContactCandidate>());
        let out_view = BufferView::new(Arc::from(Vec::<u8>::new()), vec![0], 4);

        let result = cpu
            .dispatch(&Kernel::MapContactHistory, &[prev_view, new_view, out_view], [1, 1, 1])
            .expect("dispatch failed");
        let mapping: &[u32] = bytemuck::cast_slice(&result[0]);
        assert_eq!(mapping, &[0, NULL_MAPPING]);
    }
}
