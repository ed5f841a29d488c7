//! Layout computation for tiled windows.
//!
//! `compute` is a pure function from a window list, a layout mode, the
//! usable screen area and the layout parameters to per-window geometries.
//! Floating and fullscreen windows never reach it; callers filter them out.
//! Determinism makes repeated reflows naturally flicker-free: unchanged
//! input yields bit-identical output.

use serde::{Deserialize, Serialize};
use x11rb::protocol::xproto::Window;

use crate::types::Rect;

/// Arrangement applied to a workspace's tiled windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutMode {
    /// First window takes a configurable share of the width, the rest
    /// stack vertically beside it.
    MasterStack,
    /// Near-square grid, rows = ceil(sqrt(n)), filled row-major.
    Grid,
    /// Every window gets the full usable area; only the top one shows.
    Monocle,
}

impl LayoutMode {
    /// Cycle order for the next-layout action.
    pub fn next(self) -> Self {
        match self {
            LayoutMode::MasterStack => LayoutMode::Grid,
            LayoutMode::Grid => LayoutMode::Monocle,
            LayoutMode::Monocle => LayoutMode::MasterStack,
        }
    }
}

/// Tunable layout parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutParams {
    /// Pixels between adjacent tiles.
    pub gap: u32,
    /// Share of the width given to the master window.
    pub master_ratio: f64,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self { gap: 8, master_ratio: 0.6 }
    }
}

/// Compute geometries for `windows` in workspace order.
///
/// Empty input yields no assignments; a single window always receives the
/// full usable area, whatever the mode.
pub fn compute(
    windows: &[Window],
    mode: LayoutMode,
    usable: Rect,
    params: &LayoutParams,
) -> Vec<(Window, Rect)> {
    match windows {
        [] => Vec::new(),
        [single] => vec![(*single, usable)],
        _ => match mode {
            LayoutMode::MasterStack => master_stack(windows, usable, params),
            LayoutMode::Grid => grid(windows, usable, params.gap),
            LayoutMode::Monocle => windows.iter().map(|&w| (w, usable)).collect(),
        },
    }
}

fn master_stack(windows: &[Window], usable: Rect, params: &LayoutParams) -> Vec<(Window, Rect)> {
    let gap = params.gap;
    let master_width = (usable.width.saturating_sub(gap) as f64 * params.master_ratio) as u32;
    let stack_width = usable.width.saturating_sub(master_width + gap);
    let stack_x = usable.x + master_width as i32 + gap as i32;

    let mut out = Vec::with_capacity(windows.len());
    out.push((
        windows[0],
        Rect::new(usable.x, usable.y, master_width, usable.height),
    ));

    let stack = &windows[1..];
    let count = stack.len() as u32;
    let total_height = usable.height.saturating_sub((count - 1) * gap);
    let base = total_height / count;
    let remainder = total_height % count;

    let mut y = usable.y;
    for (i, &window) in stack.iter().enumerate() {
        // The last stack window absorbs the integer remainder so the
        // column exactly covers the usable height.
        let height = if i as u32 == count - 1 { base + remainder } else { base };
        out.push((window, Rect::new(stack_x, y, stack_width, height)));
        y += (height + gap) as i32;
    }
    out
}

fn grid(windows: &[Window], usable: Rect, gap: u32) -> Vec<(Window, Rect)> {
    let n = windows.len() as u32;
    let rows = (n as f64).sqrt().ceil() as u32;
    let cols = n.div_ceil(rows);

    let total_width = usable.width.saturating_sub((cols - 1) * gap);
    let total_height = usable.height.saturating_sub((rows - 1) * gap);
    let base_width = total_width / cols;
    let base_height = total_height / rows;
    let rem_width = total_width % cols;
    let rem_height = total_height % rows;

    let mut out = Vec::with_capacity(windows.len());
    for (i, &window) in windows.iter().enumerate() {
        let row = i as u32 / cols;
        let col = i as u32 % cols;

        let width = if col == cols - 1 { base_width + rem_width } else { base_width };
        let height = if row == rows - 1 { base_height + rem_height } else { base_height };
        let x = usable.x + (col * (base_width + gap)) as i32;
        let y = usable.y + (row * (base_height + gap)) as i32;
        out.push((window, Rect::new(x, y, width, height)));
    }
    out
}
