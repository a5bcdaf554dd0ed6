// # Buffer Manager
//
// Page cache shared by every persistent structure. Two pools with
// independent capacities: one for regular pages and one for large pages
// (list stores). Frames are pinned for the duration of a read or write and
// evicted by a clock sweep that never touches a pinned frame.

mod manager;

pub use manager::{BufferManager, BufferPoolStats, FrameGuard};
