pub mod metadata;
pub mod transcript;

pub use metadata::{MetadataClient, VideoMetadata};
pub use transcript::{Segment, Transcript, TranscriptClient, TranscriptError};
