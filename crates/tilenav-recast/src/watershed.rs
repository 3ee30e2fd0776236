//! Watershed partitioning of the walkable surface into simple regions
//!
//! Spans are flooded level by level from the distance field peaks. Small
//! islands are discarded and small regions merged into neighbours, then the
//! surviving region ids are compacted to `1..=max_regions`.

use tilenav_common::{Error, Result};

use crate::compact_heightfield::{CompactHeightfield, BORDER_REG};
use crate::heightfield::{dir_offset_x, dir_offset_z, NULL_AREA};

const NB_STACKS: usize = 8;
const LOG_LEVELS_PER_STACK: u16 = 1;
const EXPAND_ITERS: i32 = 8;

#[derive(Debug, Clone, Copy)]
struct LevelStackEntry {
    x: i32,
    z: i32,
    /// Span index, `None` once the entry has been consumed
    index: Option<usize>,
}

#[derive(Debug, Clone, Default)]
struct Region {
    span_count: i32,
    id: u16,
    area_type: u8,
    visited: bool,
    overlap: bool,
    connections: Vec<u16>,
    floors: Vec<u16>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    fn is_connected_to_border(&self) -> bool {
        self.connections.contains(&0)
    }

    fn add_unique_floor(&mut self, id: u16) {
        if !self.floors.contains(&id) {
            self.floors.push(id);
        }
    }

    fn remove_adjacent_neighbours(&mut self) {
        let mut i = 0;
        while i < self.connections.len() && self.connections.len() > 1 {
            let ni = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[ni] {
                self.connections.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbour(&mut self, old_id: u16, new_id: u16) {
        let mut changed = false;
        for c in &mut self.connections {
            if *c == old_id {
                *c = new_id;
                changed = true;
            }
        }
        for f in &mut self.floors {
            if *f == old_id {
                *f = new_id;
            }
        }
        if changed {
            self.remove_adjacent_neighbours();
        }
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area_type != other.area_type {
            return false;
        }
        let shared = self.connections.iter().filter(|&&c| c == other.id).count();
        if shared > 1 {
            return false;
        }
        !self.floors.contains(&other.id)
    }
}

/// Partitions the walkable spans of `chf` into regions
///
/// Requires [`build_distance_field`](crate::build_distance_field) to have
/// run. A `border_size` strip around the heightfield is painted with border
/// regions that never take part in merging.
pub fn build_regions(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let n = chf.span_count();

    if chf.dist.len() != n {
        return Err(Error::NavMeshGeneration(
            "distance field has not been built".to_string(),
        ));
    }

    let mut src_reg = vec![0u16; n];
    let mut src_dist = vec![0u16; n];
    let mut lvl_stacks: Vec<Vec<LevelStackEntry>> = vec![Vec::new(); NB_STACKS];
    let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

    let mut region_id: u16 = 1;
    let mut level = (chf.max_distance + 1) & !1;

    if border_size > 0 {
        let bw = w.min(border_size);
        let bh = h.min(border_size);
        paint_rect_region(chf, 0, bw, 0, h, region_id | BORDER_REG, &mut src_reg);
        region_id += 1;
        paint_rect_region(chf, w - bw, w, 0, h, region_id | BORDER_REG, &mut src_reg);
        region_id += 1;
        paint_rect_region(chf, 0, w, 0, bh, region_id | BORDER_REG, &mut src_reg);
        region_id += 1;
        paint_rect_region(chf, 0, w, h - bh, h, region_id | BORDER_REG, &mut src_reg);
        region_id += 1;
    }
    chf.border_size = border_size;

    let mut stack_id: usize = NB_STACKS - 1;
    while level > 0 {
        level = level.saturating_sub(2);
        stack_id = (stack_id + 1) & (NB_STACKS - 1);

        if stack_id == 0 {
            sort_cells_by_level(level, chf, &src_reg, &mut lvl_stacks);
        } else {
            let (prev, cur) = lvl_stacks.split_at_mut(stack_id);
            append_stacks(&prev[stack_id - 1], &mut cur[0], &src_reg);
        }

        expand_regions(
            EXPAND_ITERS,
            level,
            chf,
            &mut src_reg,
            &mut src_dist,
            &mut lvl_stacks[stack_id],
            false,
        );

        for j in 0..lvl_stacks[stack_id].len() {
            let entry = lvl_stacks[stack_id][j];
            let Some(i) = entry.index else {
                continue;
            };
            if src_reg[i] != 0 {
                continue;
            }
            if flood_region(
                entry.x,
                entry.z,
                i,
                level,
                region_id,
                chf,
                &mut src_reg,
                &mut src_dist,
                &mut stack,
            ) {
                if region_id == 0xffff {
                    return Err(Error::NavMeshGeneration(
                        "region id overflow".to_string(),
                    ));
                }
                region_id += 1;
            }
        }
    }

    // Expand current regions until no empty connected cells are found.
    expand_regions(
        EXPAND_ITERS * 8,
        0,
        chf,
        &mut src_reg,
        &mut src_dist,
        &mut stack,
        true,
    );

    let max_region_id = merge_and_filter_regions(
        min_region_area,
        merge_region_area,
        region_id,
        chf,
        &mut src_reg,
    );
    chf.max_regions = max_region_id;

    for (span, reg) in chf.spans.iter_mut().zip(&src_reg) {
        span.reg = *reg;
    }

    Ok(())
}

fn paint_rect_region(
    chf: &CompactHeightfield,
    minx: i32,
    maxx: i32,
    minz: i32,
    maxz: i32,
    reg_id: u16,
    src_reg: &mut [u16],
) {
    for z in minz..maxz {
        for x in minx..maxx {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[i] != NULL_AREA {
                    src_reg[i] = reg_id;
                }
            }
        }
    }
}

fn sort_cells_by_level(
    start_level: u16,
    chf: &CompactHeightfield,
    src_reg: &[u16],
    stacks: &mut [Vec<LevelStackEntry>],
) {
    let start_level = (start_level >> LOG_LEVELS_PER_STACK) as i32;
    for stack in stacks.iter_mut() {
        stack.clear();
    }

    for (x, z, i) in chf.iter_spans() {
        if chf.areas[i] == NULL_AREA || src_reg[i] != 0 {
            continue;
        }
        let level = (chf.dist[i] >> LOG_LEVELS_PER_STACK) as i32;
        let stack_id = (start_level - level).max(0) as usize;
        if stack_id >= stacks.len() {
            continue;
        }
        stacks[stack_id].push(LevelStackEntry {
            x,
            z,
            index: Some(i),
        });
    }
}

fn append_stacks(src: &[LevelStackEntry], dst: &mut Vec<LevelStackEntry>, src_reg: &[u16]) {
    for entry in src {
        if let Some(i) = entry.index {
            if src_reg[i] == 0 {
                dst.push(*entry);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn flood_region(
    x: i32,
    z: i32,
    i: usize,
    level: u16,
    r: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
) -> bool {
    let area = chf.areas[i];

    stack.clear();
    stack.push(LevelStackEntry { x, z, index: Some(i) });
    src_reg[i] = r;
    src_dist[i] = 0;

    let lev = level.saturating_sub(2);
    let mut count = 0;

    while let Some(entry) = stack.pop() {
        let (cx, cz) = (entry.x, entry.z);
        let Some(ci) = entry.index else {
            continue;
        };

        // Check if any of the neighbours already have a valid region set.
        let mut ar = 0u16;
        for dir in 0..4 {
            let Some(ai) = chf.neighbour(cx, cz, ci, dir) else {
                continue;
            };
            if chf.areas[ai] != area {
                continue;
            }
            let nr = src_reg[ai];
            if nr & BORDER_REG != 0 {
                continue;
            }
            if nr != 0 && nr != r {
                ar = nr;
                break;
            }

            let ax = cx + dir_offset_x(dir);
            let az = cz + dir_offset_z(dir);
            if let Some(ai2) = chf.neighbour(ax, az, ai, (dir + 1) & 3) {
                if chf.areas[ai2] != area {
                    continue;
                }
                let nr2 = src_reg[ai2];
                if nr2 != 0 && nr2 != r {
                    ar = nr2;
                    break;
                }
            }
        }
        if ar != 0 {
            src_reg[ci] = 0;
            continue;
        }

        count += 1;

        for dir in 0..4 {
            let Some(ai) = chf.neighbour(cx, cz, ci, dir) else {
                continue;
            };
            if chf.areas[ai] != area {
                continue;
            }
            if chf.dist[ai] >= lev && src_reg[ai] == 0 {
                src_reg[ai] = r;
                src_dist[ai] = 0;
                stack.push(LevelStackEntry {
                    x: cx + dir_offset_x(dir),
                    z: cz + dir_offset_z(dir),
                    index: Some(ai),
                });
            }
        }
    }

    count > 0
}

fn expand_regions(
    max_iter: i32,
    level: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
    fill_stack: bool,
) {
    if fill_stack {
        stack.clear();
        for (x, z, i) in chf.iter_spans() {
            if chf.dist[i] >= level && src_reg[i] == 0 && chf.areas[i] != NULL_AREA {
                stack.push(LevelStackEntry { x, z, index: Some(i) });
            }
        }
    } else {
        // Mark cells which already have a region.
        for entry in stack.iter_mut() {
            if let Some(i) = entry.index {
                if src_reg[i] != 0 {
                    entry.index = None;
                }
            }
        }
    }

    let mut dirty: Vec<(usize, u16, u16)> = Vec::new();
    let mut iter = 0;
    while !stack.is_empty() {
        let mut failed = 0;
        dirty.clear();

        for entry in stack.iter_mut() {
            let Some(i) = entry.index else {
                failed += 1;
                continue;
            };

            let mut r = src_reg[i];
            let mut d2 = 0xffffu16;
            let area = chf.areas[i];
            for dir in 0..4 {
                let Some(ai) = chf.neighbour(entry.x, entry.z, i, dir) else {
                    continue;
                };
                if chf.areas[ai] != area {
                    continue;
                }
                let nr = src_reg[ai];
                if nr > 0 && nr & BORDER_REG == 0 && src_dist[ai].saturating_add(2) < d2 {
                    r = nr;
                    d2 = src_dist[ai] + 2;
                }
            }

            if r != 0 {
                entry.index = None;
                dirty.push((i, r, d2));
            } else {
                failed += 1;
            }
        }

        // Copy entries that differ to keep them in sync with the sweep.
        for &(i, r, d2) in &dirty {
            src_reg[i] = r;
            src_dist[i] = d2;
        }

        if failed == stack.len() {
            break;
        }

        if level > 0 {
            iter += 1;
            if iter >= max_iter {
                break;
            }
        }
    }
}

fn is_solid_edge(
    chf: &CompactHeightfield,
    src_reg: &[u16],
    x: i32,
    z: i32,
    i: usize,
    dir: usize,
) -> bool {
    let r = chf
        .neighbour(x, z, i, dir)
        .map_or(0, |ai| src_reg[ai]);
    r != src_reg[i]
}

/// Walks the boundary of the region containing span `i`, collecting the
/// ids of the regions on the other side in order
fn walk_region_contour(
    mut x: i32,
    mut z: i32,
    mut i: usize,
    mut dir: usize,
    chf: &CompactHeightfield,
    src_reg: &[u16],
    cont: &mut Vec<u16>,
) {
    let start_dir = dir;
    let start_i = i;

    let mut cur_reg = chf.neighbour(x, z, i, dir).map_or(0, |ai| src_reg[ai]);
    cont.push(cur_reg);

    let mut iter = 0;
    loop {
        iter += 1;
        if iter >= 40000 {
            break;
        }

        if is_solid_edge(chf, src_reg, x, z, i, dir) {
            let r = chf.neighbour(x, z, i, dir).map_or(0, |ai| src_reg[ai]);
            if r != cur_reg {
                cur_reg = r;
                cont.push(cur_reg);
            }
            dir = (dir + 1) & 3;
        } else {
            let Some(ni) = chf.neighbour(x, z, i, dir) else {
                return;
            };
            x += dir_offset_x(dir);
            z += dir_offset_z(dir);
            i = ni;
            dir = (dir + 3) & 3;
        }

        if start_i == i && start_dir == dir {
            break;
        }
    }

    // Remove adjacent duplicates.
    if cont.len() > 1 {
        let mut j = 0;
        while j < cont.len() {
            let nj = (j + 1) % cont.len();
            if cont[j] == cont[nj] && cont.len() > 1 {
                cont.remove(j);
            } else {
                j += 1;
            }
        }
    }
}

/// Merges `b` into `a` along their shared connection
fn merge_regions(regions: &mut [Region], a: usize, b: usize) -> bool {
    let aid = regions[a].id;
    let bid = regions[b].id;

    let acon = regions[a].connections.clone();
    let bcon = regions[b].connections.clone();

    let Some(insa) = acon.iter().position(|&c| c == bid) else {
        return false;
    };
    let Some(insb) = bcon.iter().position(|&c| c == aid) else {
        return false;
    };

    let mut merged = Vec::with_capacity(acon.len() + bcon.len());
    for k in 0..acon.len() - 1 {
        merged.push(acon[(insa + 1 + k) % acon.len()]);
    }
    for k in 0..bcon.len() - 1 {
        merged.push(bcon[(insb + 1 + k) % bcon.len()]);
    }

    let floors = std::mem::take(&mut regions[b].floors);
    let span_count = regions[b].span_count;
    regions[b].span_count = 0;
    regions[b].connections.clear();

    let region_a = &mut regions[a];
    region_a.connections = merged;
    region_a.remove_adjacent_neighbours();
    for f in floors {
        region_a.add_unique_floor(f);
    }
    region_a.span_count += span_count;
    true
}

fn merge_and_filter_regions(
    min_region_area: i32,
    merge_region_size: i32,
    max_region_id: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
) -> u16 {
    let nreg = max_region_id as usize + 1;
    let mut regions: Vec<Region> = (0..nreg).map(|i| Region::new(i as u16)).collect();

    // Find the edge of each region and the connections around its contour.
    for (x, z, i) in chf.iter_spans() {
        let r = src_reg[i];
        if r == 0 || r as usize >= nreg {
            continue;
        }

        regions[r as usize].span_count += 1;

        let cell = chf.cell(x, z);
        for j in cell.index as usize..(cell.index + cell.count) as usize {
            if i == j {
                continue;
            }
            let floor_id = src_reg[j];
            if floor_id == 0 || floor_id as usize >= nreg {
                continue;
            }
            if floor_id == r {
                regions[r as usize].overlap = true;
            }
            regions[r as usize].add_unique_floor(floor_id);
        }

        if !regions[r as usize].connections.is_empty() {
            continue;
        }

        regions[r as usize].area_type = chf.areas[i];

        if let Some(dir) = (0..4).find(|&dir| is_solid_edge(chf, src_reg, x, z, i, dir)) {
            let mut connections = Vec::new();
            walk_region_contour(x, z, i, dir, chf, src_reg, &mut connections);
            regions[r as usize].connections = connections;
        }
    }

    // Remove too small regions.
    let mut stack: Vec<usize> = Vec::new();
    let mut trace: Vec<usize> = Vec::new();
    for i in 0..nreg {
        let reg = &regions[i];
        if reg.id == 0 || reg.id & BORDER_REG != 0 || reg.span_count == 0 || reg.visited {
            continue;
        }

        let mut connects_to_border = false;
        let mut span_count = 0;
        stack.clear();
        trace.clear();

        regions[i].visited = true;
        stack.push(i);

        while let Some(ri) = stack.pop() {
            span_count += regions[ri].span_count;
            trace.push(ri);

            for k in 0..regions[ri].connections.len() {
                let con = regions[ri].connections[k];
                if con & BORDER_REG != 0 {
                    connects_to_border = true;
                    continue;
                }
                let nei = &mut regions[con as usize];
                if nei.visited || nei.id == 0 || nei.id & BORDER_REG != 0 {
                    continue;
                }
                nei.visited = true;
                stack.push(nei.id as usize);
            }
        }

        // Regions touching the tile border cannot be measured here, so
        // they are kept whatever their size.
        if span_count < min_region_area && !connects_to_border {
            for &t in &trace {
                regions[t].span_count = 0;
                regions[t].id = 0;
            }
        }
    }

    // Merge too small regions into neighbour regions.
    loop {
        let mut merge_count = 0;
        for i in 0..nreg {
            let reg = &regions[i];
            if reg.id == 0 || reg.id & BORDER_REG != 0 || reg.overlap || reg.span_count == 0 {
                continue;
            }

            // Large regions that touch the outside are left alone.
            if reg.span_count > merge_region_size && reg.is_connected_to_border() {
                continue;
            }

            let mut smallest = i32::MAX;
            let mut merge_id = reg.id;
            for &con in &reg.connections {
                if con & BORDER_REG != 0 {
                    continue;
                }
                let mreg = &regions[con as usize];
                if mreg.id == 0 || mreg.id & BORDER_REG != 0 || mreg.overlap {
                    continue;
                }
                if mreg.span_count < smallest && reg.can_merge_with(mreg) && mreg.can_merge_with(reg)
                {
                    smallest = mreg.span_count;
                    merge_id = mreg.id;
                }
            }

            if merge_id != reg.id {
                let old_id = reg.id;
                if merge_regions(&mut regions, merge_id as usize, i) {
                    for region in regions.iter_mut() {
                        if region.id == 0 || region.id & BORDER_REG != 0 {
                            continue;
                        }
                        // Regions already merged into this one follow it.
                        if region.id == old_id {
                            region.id = merge_id;
                        }
                        region.replace_neighbour(old_id, merge_id);
                    }
                    merge_count += 1;
                }
            }
        }
        if merge_count == 0 {
            break;
        }
    }

    // Compress region ids. Only ids still owning spans survive; slots that
    // were never flooded, filtered out or reserved for the border map to 0.
    let mut new_ids = vec![0u16; nreg];
    let mut reg_id_gen: u16 = 0;
    for reg in &regions {
        if reg.id == 0 || reg.id & BORDER_REG != 0 || reg.span_count == 0 {
            continue;
        }
        let slot = &mut new_ids[reg.id as usize];
        if *slot == 0 {
            reg_id_gen += 1;
            *slot = reg_id_gen;
        }
    }
    for reg in regions.iter_mut() {
        if reg.id & BORDER_REG == 0 {
            reg.id = new_ids.get(reg.id as usize).copied().unwrap_or(0);
        }
    }

    for reg in src_reg.iter_mut() {
        if *reg & BORDER_REG == 0 {
            *reg = regions[*reg as usize].id;
        }
    }

    reg_id_gen
}
