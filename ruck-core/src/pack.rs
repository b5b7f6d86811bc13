//! 2D rectangle packer: guillotine/MaxRects-style placement with a
//! best-short-side-fit heuristic, matching the bin-packing shape used by the
//! asset-atlas tooling in the retrieved pack (compare the MaxRects packer in
//! `rust_pixel`'s `tools/asset`), reworked here to the page/rotation/pow2
//! contract this format specifies.

use crate::error::{Result, RuckError};

/// One rectangle to place, identified by `key` so ties can be broken
/// deterministically.
#[derive(Debug, Clone)]
pub struct PackRect {
    pub key: String,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Placement {
    pub page_index: usize,
    pub x: u32,
    pub y: u32,
    pub rotated: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PageDims {
    pub width: u32,
    pub height: u32,
}

pub struct PackResult {
    /// Placements in the same order as the input slice.
    pub placements: Vec<Placement>,
    pub pages: Vec<PageDims>,
}

#[derive(Debug, Clone, Copy)]
pub struct Constraints {
    pub max_w: u32,
    pub max_h: u32,
    pub pow2: bool,
    pub allow_r90: bool,
}

#[derive(Debug, Clone, Copy)]
struct FreeRect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

struct Page {
    free: Vec<FreeRect>,
    bound_w: u32,
    bound_h: u32,
}

impl Page {
    fn new(max_w: u32, max_h: u32) -> Self {
        Page { free: vec![FreeRect { x: 0, y: 0, w: max_w, h: max_h }], bound_w: 0, bound_h: 0 }
    }

    /// Best candidate in this page: (free_rect_index, rotated, short_side,
    /// long_side, y, x). Ties break by leftover long side, then by lower y,
    /// then by lower x, per the packer's placement order.
    fn best_candidate(&self, w: u32, h: u32, allow_r90: bool) -> Option<(usize, bool, u32, u32, u32, u32)> {
        let mut best: Option<(usize, bool, u32, u32, u32, u32)> = None;
        for (i, f) in self.free.iter().enumerate() {
            let mut orientations: Vec<(u32, u32, bool)> = vec![(w, h, false)];
            if allow_r90 && w != h {
                orientations.push((h, w, true));
            }
            for (cw, ch, rotated) in orientations {
                if cw <= f.w && ch <= f.h {
                    let leftover_a = f.w - cw;
                    let leftover_b = f.h - ch;
                    let short = leftover_a.min(leftover_b);
                    let long = leftover_a.max(leftover_b);
                    let better = match &best {
                        None => true,
                        Some((_, brot, bshort, blong, by, bx)) => {
                            (short, long, rotated as u8, f.y, f.x)
                                < (*bshort, *blong, *brot as u8, *by, *bx)
                        }
                    };
                    if better {
                        best = Some((i, rotated, short, long, f.y, f.x));
                    }
                }
            }
        }
        best
    }

    fn place(&mut self, idx: usize, x: u32, y: u32, w: u32, h: u32) {
        self.free.remove(idx);
        let placed = FreeRect { x, y, w, h };
        let mut next = Vec::with_capacity(self.free.len() + 4);
        for f in self.free.drain(..) {
            split_against(f, placed, &mut next);
        }
        self.free = next;
        self.bound_w = self.bound_w.max(x + w);
        self.bound_h = self.bound_h.max(y + h);
    }
}

/// Split free rectangle `f` against the newly placed rectangle `p`, pushing
/// the non-overlapping remainder pieces (up to four) into `out`. If `f` and
/// `p` do not overlap, `f` is pushed back unchanged. If `f` is fully
/// contained in `p`, nothing is pushed.
fn split_against(f: FreeRect, p: FreeRect, out: &mut Vec<FreeRect>) {
    let overlap = f.x < p.x + p.w && p.x < f.x + f.w && f.y < p.y + p.h && p.y < f.y + f.h;
    if !overlap {
        out.push(f);
        return;
    }
    if p.x > f.x {
        out.push(FreeRect { x: f.x, y: f.y, w: p.x - f.x, h: f.h });
    }
    if p.x + p.w < f.x + f.w {
        let nx = p.x + p.w;
        out.push(FreeRect { x: nx, y: f.y, w: (f.x + f.w) - nx, h: f.h });
    }
    if p.y > f.y {
        out.push(FreeRect { x: f.x, y: f.y, w: f.w, h: p.y - f.y });
    }
    if p.y + p.h < f.y + f.h {
        let ny = p.y + p.h;
        out.push(FreeRect { x: f.x, y: ny, w: f.w, h: (f.y + f.h) - ny });
    }
    out.retain(|r| r.w > 0 && r.h > 0);
}

fn round_up_pow2(mut v: u32) -> u32 {
    if v == 0 {
        return 1;
    }
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v + 1
}

fn round_up_mult4(v: u32) -> u32 {
    (v + 3) & !3
}

fn floor_pow2(v: u32) -> u32 {
    if v == 0 {
        return 0;
    }
    1u32 << (31 - v.leading_zeros())
}

fn floor_mult4(v: u32) -> u32 {
    v & !3
}

/// The aligned page size (power of two, or multiple of four) that is both
/// `>= bound` and `<= cap`, preferring the smallest such size. `None` if no
/// aligned size fits, i.e. `cap` isn't itself aligned tightly enough to
/// still contain `bound` once rounded down.
fn aligned_dim(bound: u32, cap: u32, pow2: bool) -> Option<u32> {
    let rounded = if pow2 { round_up_pow2(bound) } else { round_up_mult4(bound) };
    if rounded <= cap {
        return Some(rounded);
    }
    let floor = if pow2 { floor_pow2(cap) } else { floor_mult4(cap) };
    if floor >= bound {
        Some(floor)
    } else {
        None
    }
}

/// Pack `rects` into one or more pages under `constraints`.
///
/// Input order does not matter: placements are returned in the same order
/// as `rects`, but internally rectangles are sorted by `max(w,h)` desc, then
/// area desc, then key asc, so identical input sets and flags always produce
/// byte-identical placements regardless of how the caller enumerated them.
pub fn pack(rects: &[PackRect], constraints: Constraints) -> Result<PackResult> {
    for r in rects {
        let fits_unrotated = r.w <= constraints.max_w && r.h <= constraints.max_h;
        let fits_rotated =
            constraints.allow_r90 && r.h <= constraints.max_w && r.w <= constraints.max_h;
        if !fits_unrotated && !fits_rotated {
            return Err(RuckError::CannotFit {
                key: r.key.clone(),
                w: r.w,
                h: r.h,
                max_w: constraints.max_w,
                max_h: constraints.max_h,
                allow_r90: constraints.allow_r90,
            });
        }
    }

    let mut order: Vec<usize> = (0..rects.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = &rects[a];
        let rb = &rects[b];
        let max_a = ra.w.max(ra.h);
        let max_b = rb.w.max(rb.h);
        max_b
            .cmp(&max_a)
            .then_with(|| (rb.w as u64 * rb.h as u64).cmp(&(ra.w as u64 * ra.h as u64)))
            .then_with(|| ra.key.cmp(&rb.key))
    });

    let mut pages: Vec<Page> = Vec::new();
    let mut placements: Vec<Option<Placement>> = vec![None; rects.len()];

    for &idx in &order {
        let r = &rects[idx];
        // page, free_idx, rotated, short, long, y, x
        let mut best: Option<(usize, usize, bool, u32, u32, u32, u32)> = None;
        for (pi, page) in pages.iter().enumerate() {
            if let Some((fi, rotated, short, long, y, x)) =
                page.best_candidate(r.w, r.h, constraints.allow_r90)
            {
                let better = match &best {
                    None => true,
                    Some((_, _, brot, bshort, blong, by, bx)) => {
                        (short, long, rotated as u8, y, x) < (*bshort, *blong, *brot as u8, *by, *bx)
                    }
                };
                if better {
                    best = Some((pi, fi, rotated, short, long, y, x));
                }
            }
        }

        let (page_idx, free_idx, rotated) = match best {
            Some((pi, fi, rotated, ..)) => (pi, fi, rotated),
            None => {
                pages.push(Page::new(constraints.max_w, constraints.max_h));
                let pi = pages.len() - 1;
                // A brand new page's only free rect is the full max_w x
                // max_h bin, and every rect here already passed the
                // pre-flight CannotFit check, so the unrotated orientation
                // fits unless only the rotated one does.
                let rotated = !(r.w <= constraints.max_w && r.h <= constraints.max_h);
                (pi, 0, rotated)
            }
        };

        let (cw, ch) = if rotated { (r.h, r.w) } else { (r.w, r.h) };
        let x = pages[page_idx].free[free_idx].x;
        let y = pages[page_idx].free[free_idx].y;
        pages[page_idx].place(free_idx, x, y, cw, ch);
        placements[idx] = Some(Placement { page_index: page_idx, x, y, rotated });
    }

    let mut page_dims = Vec::with_capacity(pages.len());
    for (pi, p) in pages.iter().enumerate() {
        let cannot_fit = || RuckError::CannotFit {
            key: format!("<page {pi}>"),
            w: p.bound_w,
            h: p.bound_h,
            max_w: constraints.max_w,
            max_h: constraints.max_h,
            allow_r90: constraints.allow_r90,
        };
        let width = aligned_dim(p.bound_w, constraints.max_w, constraints.pow2).ok_or_else(cannot_fit)?;
        let height = aligned_dim(p.bound_h, constraints.max_h, constraints.pow2).ok_or_else(cannot_fit)?;
        page_dims.push(PageDims { width, height });
    }

    Ok(PackResult {
        placements: placements.into_iter().map(|p| p.expect("every rect placed")).collect(),
        pages: page_dims,
    })
}
