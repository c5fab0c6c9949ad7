/// Fragment merging: index offsetting and material binding
use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::Warning;
use crate::geometry::{Fragment, MergedMesh};
use crate::mtl::MaterialTable;

#[derive(Debug, Clone, Default)]
pub struct MergeOutput {
    pub mesh: MergedMesh,
    /// Fragment warnings in merge order, then binding warnings
    pub warnings: Vec<Warning>,
    pub fragments: usize,
    pub groups: usize,
    pub objects: usize,
}

/// Concatenate `fragments` in the given order. Each fragment's faces are
/// shifted by the attribute counts of all fragments before it and their
/// `usemtl` slots are bound to `table` by name.
pub fn merge_fragments(fragments: Vec<Fragment>, table: &MaterialTable) -> MergeOutput {
    let mut out = MergeOutput {
        fragments: fragments.len(),
        ..Default::default()
    };
    let mut reported: HashSet<(String, PathBuf)> = HashSet::new();

    for mut fragment in fragments {
        out.warnings.append(&mut fragment.warnings);
        out.groups += fragment.groups;
        out.objects += fragment.objects;

        let mut slot_map = Vec::with_capacity(fragment.material_slots.len());
        for (slot, name) in fragment.material_slots.iter().enumerate() {
            if slot == Fragment::DEFAULT_SLOT {
                slot_map.push(MaterialTable::DEFAULT_INDEX);
                continue;
            }
            let index = match table.index_of(name) {
                Some(index) => index,
                None => {
                    if reported.insert((name.clone(), fragment.source.clone())) {
                        warn!(
                            "{:?}: material '{}' is not declared, using default",
                            fragment.source, name
                        );
                        out.warnings.push(Warning::MaterialNotFound {
                            name: name.clone(),
                            file: fragment.source.clone(),
                        });
                    }
                    MaterialTable::DEFAULT_INDEX
                }
            };
            slot_map.push(index);
        }

        let source = fragment.source.clone();
        let offset = out.mesh.append(fragment, |slot| {
            slot_map
                .get(slot)
                .copied()
                .unwrap_or(MaterialTable::DEFAULT_INDEX)
        });
        debug!(
            "Merged {:?} at offsets v={} vt={} vn={}",
            source, offset.position, offset.uv, offset.normal
        );
    }
    out
}
