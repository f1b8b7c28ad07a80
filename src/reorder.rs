//! Order-index arithmetic for moving a window within the list, and the drag gesture that drives it.

use tracing::debug;

use crate::engine::Engine;
use crate::error::Result;
use crate::window::Hwnd;



/// Whole rows a drag offset amounts to, rounding at half a row
pub fn move_step (offset:f64, row_height:f64) -> i64 {
    if row_height <= 0.0 || !offset.is_finite() { return 0 }
    ((offset + row_height / 2.0) / row_height).floor() as i64
}

/// Target index for moving from `current` by `step`, clamped to the list ends
pub fn clamp_target (current:usize, step:i64, row_count:usize) -> usize {
    if row_count == 0 { return 0 }
    let max = (row_count - 1) as i64;
    (current as i64 + step) .clamp (0, max) as usize
}

/// Moves the entry at `origin` to `target`, shifting every entry in between by one toward the
/// vacated slot. Indices outside that range are untouched.
pub fn apply_move <'a, I> (orders:I, origin:usize, target:usize) where I: IntoIterator<Item = &'a mut usize> {
    if origin == target { return }
    for o in orders {
        if *o == origin { *o = target }
        else if origin < target && *o > origin && *o <= target { *o -= 1 }
        else if target < origin && *o >= target && *o < origin { *o += 1 }
    }
}



/// Where a dragged row would land if released now
# [ derive (Debug, Default, Eq, PartialEq, Copy, Clone) ]
pub struct DropMarker {
    pub slot : usize,
    pub step : i64,
}


/// An in-progress drag of one row. Updates only compute where the drop marker goes,
/// the ordering changes once on release.
# [ derive (Debug, Clone) ]
pub struct DragGesture {
    pub hwnd       : Hwnd,
    pub origin     : usize,
    pub row_count  : usize,
    pub row_height : f64,
    pub offset     : f64,
}

impl DragGesture {

    /// Starts dragging a tracked window. `list_height` is the rendered height of the whole list.
    pub fn begin (engine:&Engine, hwnd:Hwnd, list_height:f64) -> Option<DragGesture> {
        let snap = engine.lock_state();
        let origin = snap.windows.get(&hwnd)?.order;
        let row_count = snap.sorted.len();
        if row_count == 0 { return None }
        let row_height = list_height / row_count as f64;
        debug! ("drag start on {:?} at slot {} (row height {:.1})", hwnd, origin, row_height);
        Some ( DragGesture { hwnd, origin, row_count, row_height, offset: 0.0 } )
    }

    pub fn update (&mut self, offset:f64) -> DropMarker {
        self.offset = offset;
        self.marker()
    }

    pub fn marker (&self) -> DropMarker {
        let step = move_step (self.offset, self.row_height);
        DropMarker { slot: clamp_target (self.origin, step, self.row_count), step }
    }

    /// Finishes the drag, applying and persisting the move. Returns the landing slot if the window moved.
    pub fn release (mut self, engine:&Engine, final_offset:f64) -> Result<Option<usize>> {
        self.offset = final_offset;
        let marker = self.marker();
        if marker.slot == self.origin { return Ok(None) }
        let moved = engine.move_window (self.hwnd, marker.step)?;
        Ok ( moved.then_some (marker.slot) )
    }

}




#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{engine_with, MemCodec};
    use pretty_assertions::assert_eq;

    #[test]
    fn step_rounds_at_half_rows() {
        assert_eq!(move_step (0.0, 30.0), 0);
        assert_eq!(move_step (14.9, 30.0), 0);
        assert_eq!(move_step (15.0, 30.0), 1);
        assert_eq!(move_step (-16.0, 30.0), -1);
        assert_eq!(move_step (-15.0, 30.0), 0);
        assert_eq!(move_step (95.0, 30.0), 3);
        assert_eq!(move_step (10.0, 0.0), 0);
    }

    #[test]
    fn targets_are_clamped_to_the_list() {
        assert_eq!(clamp_target (0, -3, 5), 0);
        assert_eq!(clamp_target (2, 10, 5), 4);
        assert_eq!(clamp_target (2, -1, 5), 1);
        assert_eq!(clamp_target (0, 1, 0), 0);
    }

    #[test]
    fn moving_up_shifts_the_range_down() {
        let mut orders = vec![0, 1, 2, 3];
        apply_move (orders.iter_mut(), 3, 1);
        assert_eq!(orders, vec![0, 2, 3, 1]);
    }

    #[test]
    fn moving_down_shifts_the_range_up() {
        let mut orders = vec![0, 1, 2, 3];
        apply_move (orders.iter_mut(), 0, 2);
        assert_eq!(orders, vec![2, 0, 1, 3]);
    }

    #[test]
    fn drag_previews_then_commits_once() {
        let (engine, source, codec) = engine_with (MemCodec::default());
        source.set (&[(1, "A - x"), (2, "B - x"), (3, "C - x"), (4, "D - x")]);
        engine.reconcile();

        let mut drag = DragGesture::begin (&engine, 4, 120.0).unwrap();
        assert_eq!(drag.update (-40.0), DropMarker { slot: 2, step: -1 });
        assert_eq!(drag.update (-70.0), DropMarker { slot: 1, step: -2 });
        // nothing changes until release
        assert_eq!(engine.sorted_handles(), vec![1, 2, 3, 4]);

        assert_eq!(drag.release (&engine, -70.0).unwrap(), Some(1));
        assert_eq!(engine.sorted_handles(), vec![1, 4, 2, 3]);
        assert_eq!(codec.writes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn short_drags_and_unknown_windows_do_nothing() {
        let (engine, source, codec) = engine_with (MemCodec::default());
        source.set (&[(1, "A - x"), (2, "B - x")]);
        engine.reconcile();
        assert!(DragGesture::begin (&engine, 9, 60.0).is_none());
        let drag = DragGesture::begin (&engine, 1, 60.0).unwrap();
        assert_eq!(drag.release (&engine, 10.0).unwrap(), None);
        assert_eq!(codec.writes.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
