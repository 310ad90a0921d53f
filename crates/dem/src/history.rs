//! History mapper: carries per-contact wildcard state across productions
//! (§4.7), so the force law's tangential-spring and other stateful terms
//! survive a contact surviving from one kT production to the next.
//!
//! Generalizes `compute::kernels::map_contact_history`'s `index_prev`
//! lookup-table approach from sphere-sphere `ContactCandidate` keys to the
//! full [`crate::narrow_phase::Contact`] space (sphere-sphere, sphere-plane,
//! sphere-plate, sphere-mesh), since the compute kernel only covers the
//! sphere-sphere narrow-phase type.

use crate::constants::{NULL_MAPPING, W_MAX};
use crate::narrow_phase::{Contact, ContactPartner};
use std::collections::HashMap;

/// A contact identity stable across productions as long as the same pair of
/// geometric entities remains in contact, independent of wildcard storage
/// location.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct ContactKey {
    a: u32,
    partner_tag: u8,
    partner_0: u32,
    partner_1: u32,
}

fn key_of(contact: &Contact) -> ContactKey {
    let (tag, p0, p1) = match contact.partner {
        ContactPartner::Sphere(s) => (0u8, s, 0),
        ContactPartner::Analytical(o) => (1u8, o, 0),
        ContactPartner::MeshFacet { owner, facet } => (2u8, owner, facet),
    };
    ContactKey { a: contact.a, partner_tag: tag, partner_0: p0, partner_1: p1 }
}

/// Per-contact wildcard storage, indexed in the same order as the contact
/// list it was produced alongside.
pub type WildcardSlots = [f64; W_MAX];

/// Maps a new contact list onto the previous production's wildcard state.
/// Contacts with no counterpart in `prev` start with zeroed wildcards
/// (their mapping is [`NULL_MAPPING`]); contacts that disappeared simply do
/// not appear in the result, so their wildcard history is dropped.
#[must_use]
pub fn map_history(
    prev_contacts: &[Contact],
    prev_wildcards: &[WildcardSlots],
    new_contacts: &[Contact],
) -> (Vec<u32>, Vec<WildcardSlots>) {
    let prev_index: HashMap<ContactKey, u32> = prev_contacts
        .iter()
        .enumerate()
        .map(|(i, c)| (key_of(c), i as u32))
        .collect();

    let mut mapping = Vec::with_capacity(new_contacts.len());
    let mut wildcards = Vec::with_capacity(new_contacts.len());
    for contact in new_contacts {
        match prev_index.get(&key_of(contact)) {
            Some(&prev_idx) => {
                mapping.push(prev_idx);
                wildcards.push(prev_wildcards[prev_idx as usize]);
            }
            None => {
                mapping.push(NULL_MAPPING);
                wildcards.push([0.0; W_MAX]);
            }
        }
    }
    (mapping, wildcards)
}
