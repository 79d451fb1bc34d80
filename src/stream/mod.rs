//! MPEG-TS fanout and HLS segmentation.

pub mod fanout;
pub mod segmenter;
pub mod ts;

pub use fanout::Fanout;
pub use segmenter::{HlsSegmenter, Segment};
