use std::collections::VecDeque;

use log::trace;

use crate::page_table::FrameNumber;

/// Physical frames nobody owns. Frames are handed out oldest-returned first.
#[derive(Debug, Default)]
pub struct FramePool {
    free: VecDeque<FrameNumber>,
}

impl FramePool {
    pub fn init(frames: impl IntoIterator<Item = FrameNumber>) -> Self {
        Self {
            free: frames.into_iter().collect(),
        }
    }

    pub fn allocate_frame(&mut self) -> Option<FrameNumber> {
        let frame = self.free.pop_front();
        if frame.is_none() {
            trace!("No free frames");
        }
        frame
    }

    pub fn release_frame(&mut self, frame: FrameNumber) {
        debug_assert!(!self.free.contains(&frame), "frame {} freed twice", frame);
        self.free.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn contains(&self, frame: FrameNumber) -> bool {
        self.free.contains(&frame)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameNumber> {
        self.free.iter()
    }
}
