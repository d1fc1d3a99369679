//! Upload ingestion.
//!
//! Request metadata is classified into an [`IngestMode`], chunked uploads are
//! numbered by the [`SegmentSequencer`], payloads are persisted by the
//! [`IngestWriter`] and every result becomes one [`IngestReply`].

pub mod classifier;
pub mod dispatcher;
pub mod headers;
pub mod response;
pub mod sequencer;
pub mod writer;

pub use classifier::{ContentClassifier, IngestMode, IngestPlan, sanitize_content_id};
pub use dispatcher::{IngestDispatcher, UploadRequest};
pub use headers::{UploadHeaders, X_CONTENT_ID};
pub use response::{IngestReply, POST_OK};
pub use sequencer::{SegmentKind, SegmentSequencer, SequenceSlot, segment_file_name};
pub use writer::{IngestOutcome, IngestWriter, WriteMode};
