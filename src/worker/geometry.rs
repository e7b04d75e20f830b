//! Slot geometry: each slot gets one quadrant of the display's usable area.

use serde::{Deserialize, Serialize};

use crate::worker::Slot;

/// Usable area of the primary display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayArea {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayArea {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        }
    }
}

/// Bounds handed to the host when opening a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl DisplayArea {
    /// Quadrant for `slot`. Odd remainders go to the right and bottom quadrants.
    pub fn slot_bounds(&self, slot: Slot) -> SlotRect {
        let left_width = self.width / 2;
        let top_height = self.height / 2;
        let (right, bottom) = (slot.index() % 2 == 1, slot.index() >= 2);

        SlotRect {
            x: self.x + if right { left_width as i32 } else { 0 },
            y: self.y + if bottom { top_height as i32 } else { 0 },
            width: if right { self.width - left_width } else { left_width },
            height: if bottom { self.height - top_height } else { top_height },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_display_splits_evenly() {
        let display = DisplayArea::default();
        let rects: Vec<_> = Slot::ALL.iter().map(|&s| display.slot_bounds(s)).collect();
        assert_eq!(rects[0], SlotRect { x: 0, y: 0, width: 960, height: 540 });
        assert_eq!(rects[1], SlotRect { x: 960, y: 0, width: 960, height: 540 });
        assert_eq!(rects[2], SlotRect { x: 0, y: 540, width: 960, height: 540 });
        assert_eq!(rects[3], SlotRect { x: 960, y: 540, width: 960, height: 540 });
    }

    #[test]
    fn odd_remainder_goes_right_and_bottom() {
        let display = DisplayArea {
            x: 0,
            y: 25,
            width: 1365,
            height: 743,
        };
        let top_left = display.slot_bounds(Slot::ALL[0]);
        let bottom_right = display.slot_bounds(Slot::ALL[3]);
        assert_eq!((top_left.width, top_left.height), (682, 371));
        assert_eq!(bottom_right, SlotRect { x: 682, y: 396, width: 683, height: 372 });
    }
}
