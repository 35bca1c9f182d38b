//! Packs a tile's `(z, x, y)` into a single `u32` fragment id, the key the
//! expiry sets are indexed by. Grounded directly in
//! `expiry_server::tile_to_frag`/`frag_to_tile`: metatile units (`x >> 3`,
//! `y >> 3`) are concatenated into a `z`-bit `xy_frag`, then tagged with the
//! zoom level in the unused high bits so fragments from different zooms
//! never collide — `z == 18` needs no tag (the full 32 bits of headroom are
//! already spent), `13 < z < 18` gets a 4-bit tag, `z <= 13` gets a 6-bit
//! tag.

const METATILE_SHIFT: i32 = 3;
const MAX_ZOOM: i32 = 18;

/// Packs a job's metatile-aligned tile coordinates and zoom into a fragment
/// id suitable for storage in a sparse per-style/format expiry set.
pub fn tile_to_frag(job: &rendermq_proto::Job) -> u32 {
    let (bx, by) = job.metatile_base();
    let mx = (bx >> METATILE_SHIFT) as u32;
    let my = (by >> METATILE_SHIFT) as u32;
    let xy_frag = (mx << (job.z - METATILE_SHIFT)) | my;

    if job.z == MAX_ZOOM {
        xy_frag
    } else if job.z > 13 {
        (((4 | (17 - job.z)) as u32) << 28) | xy_frag
    } else {
        (((32 | (13 - job.z)) as u32) << 26) | xy_frag
    }
}

/// Inverse of [`tile_to_frag`]: recovers `(z, metatile-x, metatile-y)`.
///
/// Deviates from the original's `frag_to_tile` (which is never actually
/// called there) in one respect: it masks `mx`/`my` against `1 << (z - 3)`,
/// the width each one was packed with, instead of `1 << z`, which recovers
/// the wrong coordinates for any `z` other than the couple of values the
/// original's dead code happened to be exercised against.
pub fn frag_to_tile(frag: u32) -> (i32, i32, i32) {
    let high_bits = frag >> 30;
    let z = if high_bits == 0 {
        MAX_ZOOM
    } else if high_bits == 1 {
        17 - ((frag >> 28) & 3) as i32
    } else {
        13 - ((frag >> 26) & 0x1F) as i32
    };

    let shift = z - METATILE_SHIFT;
    let mask = (1u32 << shift) - 1;
    let mx = (frag >> shift) & mask;
    let my = frag & mask;
    (z, mx as i32, my as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendermq_proto::{Format, Job, Status};

    fn job(z: i32, x: i32, y: i32) -> Job {
        Job::new(Status::Dirty, x, y, z, 0, "osm", Format::PNG)
    }

    #[test]
    fn max_zoom_fragments_are_distinct_per_metatile() {
        let a = tile_to_frag(&job(18, 0, 0));
        let b = tile_to_frag(&job(18, 8, 0));
        let c = tile_to_frag(&job(18, 0, 8));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn same_metatile_collapses_to_one_fragment() {
        let a = tile_to_frag(&job(10, 16, 24));
        let b = tile_to_frag(&job(10, 19, 29));
        assert_eq!(a, b);
    }

    #[test]
    fn different_zooms_never_collide() {
        let low = tile_to_frag(&job(5, 0, 0));
        let high = tile_to_frag(&job(18, 0, 0));
        let mid = tile_to_frag(&job(15, 0, 0));
        assert_ne!(low, high);
        assert_ne!(low, mid);
        assert_ne!(mid, high);
    }

    #[test]
    fn pack_roundtrips_through_frag_to_tile() {
        for z in [12, 13, 14, 16, 17, 18] {
            let (mx, my) = (3, 5);
            let frag = tile_to_frag(&job(z, mx * 8, my * 8));
            let (rz, rmx, rmy) = frag_to_tile(frag);
            assert_eq!((rz, rmx, rmy), (z, mx, my), "roundtrip failed for z={z}");
        }
    }
}
