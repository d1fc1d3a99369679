//! POST ingest dispatcher.
//!
//! Every upload goes through [`IngestDispatcher::dispatch`]: classify, take a
//! sequence slot when the upload is chunked, write the payload, and map the
//! result to exactly one reply. Errors never escape this boundary.

use std::fmt::Display;
use std::path::Path;

use bytes::Bytes;
use form_multipart::FormData;
use futures::Stream;
use tracing::{error, info, warn};

use crate::config::IngestConfig;
use crate::ingest::classifier::{ContentClassifier, IngestMode, IngestPlan};
use crate::ingest::headers::UploadHeaders;
use crate::ingest::response::{IngestReply, reply};
use crate::ingest::sequencer::{SegmentKind, SegmentSequencer};
use crate::ingest::writer::{IngestOutcome, IngestWriter, WriteMode};
use crate::utils::fs::{ensure_dir_all, remove_file_if_exists};
use crate::{Error, Result};

/// One upload as seen by the dispatcher.
#[derive(Debug)]
pub struct UploadRequest<S> {
    pub path: String,
    pub headers: UploadHeaders,
    pub body: S,
}

impl<S> UploadRequest<S> {
    pub fn new(path: impl Into<String>, headers: impl Into<UploadHeaders>, body: S) -> Self {
        Self {
            path: path.into(),
            headers: headers.into(),
            body,
        }
    }
}

/// Owns everything needed to turn uploads into files.
#[derive(Debug)]
pub struct IngestDispatcher {
    config: IngestConfig,
    classifier: ContentClassifier,
    sequencer: SegmentSequencer,
    writer: IngestWriter,
}

impl IngestDispatcher {
    pub fn new(config: IngestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            classifier: ContentClassifier::new(&config),
            sequencer: SegmentSequencer::new(config.stream_name.clone()),
            writer: IngestWriter::new(config.output_dir.clone(), config.read_timeout),
            config,
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn sequencer(&self) -> &SegmentSequencer {
        &self.sequencer
    }

    /// Create the output directory and clear the raw output file left over
    /// from a previous run.
    pub async fn prepare_output(&self) -> Result<()> {
        ensure_dir_all(&self.config.output_dir).await?;

        let raw_path = self.config.raw_output_path();
        if remove_file_if_exists(&raw_path).await? {
            info!(path = %raw_path.display(), "Removed previous raw output file");
        }

        info!(
            output_dir = %self.config.output_dir.display(),
            stream_name = %self.config.stream_name,
            dash_mode = %self.config.dash_mode,
            empty_raw_post = %self.config.empty_raw_post,
            "Ingest output ready"
        );
        Ok(())
    }

    /// Handle one upload and produce its reply.
    pub async fn dispatch<S, E>(&self, request: UploadRequest<S>) -> IngestReply
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let UploadRequest {
            path,
            headers,
            body,
        } = request;

        let plan = match self.classifier.classify(&path, &headers) {
            Ok(plan) => plan,
            Err(e) => {
                let result = Err(e);
                log_result(&path, &headers, None, &result);
                return reply(None, &result);
            }
        };

        let result = self.execute(&plan, body).await;
        log_result(&path, &headers, Some(&plan.mode), &result);
        reply(Some(&plan.mode), &result)
    }

    async fn execute<S, E>(&self, plan: &IngestPlan, body: S) -> Result<IngestOutcome>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let length = plan.declared_length;
        match &plan.mode {
            IngestMode::RawMediaAppend => {
                let destination = self.config.raw_output_path();
                if length == 0 {
                    return Ok(IngestOutcome {
                        destination,
                        bytes_written: 0,
                    });
                }
                self.writer
                    .write(&destination, WriteMode::Append, body, length)
                    .await
            }
            IngestMode::MultipartUpload {
                boundary,
                field_name,
            } => {
                let form_body = self.writer.read_body(body, length).await?;
                let form = FormData::parse(form_body, boundary)
                    .map_err(|e| Error::classification(format!("malformed multipart body: {e}")))?;
                let part = form.into_field(field_name).ok_or_else(|| {
                    Error::classification(format!("missing form field '{field_name}'"))
                })?;
                self.writer
                    .append(&self.config.raw_output_path(), &part.data)
                    .await
            }
            IngestMode::PathAddressedWrite { file_name } => {
                let destination = self.writer.destination(file_name);
                self.writer
                    .write(&destination, WriteMode::Truncate, body, length)
                    .await
            }
            IngestMode::SequencedChunk { hint } => self.write_sequenced(*hint, body, length).await,
        }
    }

    async fn write_sequenced<S, E>(
        &self,
        hint: Option<SegmentKind>,
        body: S,
        length: u64,
    ) -> Result<IngestOutcome>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let mut session = self.sequencer.begin().await;
        let slot = session.next(hint)?;
        let destination = self.writer.destination(&slot.file_name);

        let outcome = self
            .writer
            .write(&destination, WriteMode::Truncate, body, length)
            .await?;
        session.commit(&slot)?;

        info!(
            index = slot.index,
            kind = %slot.kind,
            file = %slot.file_name,
            bytes = outcome.bytes_written,
            "Stored segment"
        );
        Ok(outcome)
    }
}

fn log_result(
    path: &str,
    headers: &UploadHeaders,
    mode: Option<&IngestMode>,
    result: &Result<IngestOutcome>,
) {
    let mode = mode.map_or("unclassified", IngestMode::name);
    let content_type = headers.content_type().unwrap_or("-");
    let content_length = headers.content_length().unwrap_or("-");
    let content_id = headers.content_id().unwrap_or("-");

    match result {
        Ok(outcome) => info!(
            path,
            mode,
            destination = %display_name(&outcome.destination),
            bytes = outcome.bytes_written,
            "Upload stored"
        ),
        Err(e @ Error::Classification(_)) => warn!(
            kind = e.kind(),
            path,
            mode,
            content_type,
            content_length,
            content_id,
            error = %e,
            "Rejected upload"
        ),
        Err(e @ Error::Sequence(_)) => error!(
            kind = e.kind(),
            path,
            mode,
            content_type,
            content_length,
            content_id,
            error = %e,
            "Chunked upload arrived out of sequence"
        ),
        Err(e) => error!(
            kind = e.kind(),
            path,
            mode,
            content_type,
            content_length,
            content_id,
            error = %e,
            "Upload failed"
        ),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DashMode, EmptyRawPostPolicy};
    use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use futures::channel::mpsc;
    use futures::stream;
    use std::sync::Arc;

    type Chunk = std::result::Result<Bytes, std::io::Error>;

    fn dispatcher(dir: &Path) -> IngestDispatcher {
        dispatcher_with(dir, |_| {})
    }

    fn dispatcher_with(dir: &Path, tweak: impl FnOnce(&mut IngestConfig)) -> IngestDispatcher {
        let mut config = IngestConfig {
            output_dir: dir.to_path_buf(),
            ..Default::default()
        };
        tweak(&mut config);
        IngestDispatcher::new(config).unwrap()
    }

    fn request(
        path: &str,
        content_type: Option<&str>,
        content_id: Option<&str>,
        body: &[u8],
    ) -> UploadRequest<impl Stream<Item = Chunk> + Unpin> {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
        }
        if let Some(id) = content_id {
            headers.insert("x-content-id", HeaderValue::from_str(id).unwrap());
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        let chunks: Vec<Chunk> = vec![Ok(Bytes::copy_from_slice(body))];
        UploadRequest::new(path, headers, stream::iter(chunks))
    }

    fn multipart(boundary: &str, field: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"x.webm\"\r\n\
                 Content-Type: video/webm\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    #[tokio::test]
    async fn test_raw_post_appends_and_replies_post_ok() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        for _ in 0..2 {
            let reply = dispatcher
                .dispatch(request("/upload", Some("video/webm"), None, b"hello"))
                .await;
            assert_eq!(reply, IngestReply::new(StatusCode::OK, "Post OK"));
        }
        assert_eq!(
            std::fs::read(dir.path().join("test.webm")).unwrap(),
            b"hellohello"
        );
    }

    #[tokio::test]
    async fn test_multipart_appends_field_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        std::fs::write(dir.path().join("test.webm"), b"prior").unwrap();

        let body = multipart("XyZ123", "webm_file", b"\x1a\x45\xdf\xa3payload");
        let reply = dispatcher
            .dispatch(request(
                "/",
                Some("multipart/form-data; boundary=XyZ123"),
                None,
                &body,
            ))
            .await;

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, "Post OK");
        assert_eq!(
            std::fs::read(dir.path().join("test.webm")).unwrap(),
            b"prior\x1a\x45\xdf\xa3payload"
        );
    }

    #[tokio::test]
    async fn test_multipart_missing_field_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        let body = multipart("b", "other_file", b"data");
        let reply = dispatcher
            .dispatch(request("/", Some("multipart/form-data; boundary=b"), None, &body))
            .await;

        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert!(reply.body.contains("webm_file"));
        assert!(!dir.path().join("test.webm").exists());
    }

    #[tokio::test]
    async fn test_malformed_multipart_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        let reply = dispatcher
            .dispatch(request(
                "/",
                Some("multipart/form-data; boundary=b"),
                None,
                b"no delimiters here",
            ))
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert!(reply.body.starts_with("malformed multipart body"));
    }

    #[tokio::test]
    async fn test_unsupported_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        let reply = dispatcher
            .dispatch(request("/upload", Some("text/plain"), None, b"hello"))
            .await;
        assert_eq!(
            reply,
            IngestReply::new(StatusCode::BAD_REQUEST, "unsupported content type")
        );

        let reply = dispatcher
            .dispatch(request("/upload", None, None, b"hello"))
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_raw_post_rejected_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        let reply = dispatcher
            .dispatch(request("/upload", Some("video/webm"), None, b""))
            .await;
        assert_eq!(
            reply,
            IngestReply::new(StatusCode::BAD_REQUEST, "missing or zero content-length")
        );
        assert!(!dir.path().join("test.webm").exists());
    }

    #[tokio::test]
    async fn test_empty_raw_post_accepted_by_legacy_policy() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher =
            dispatcher_with(dir.path(), |c| c.empty_raw_post = EmptyRawPostPolicy::Accept);

        let reply = dispatcher
            .dispatch(request("/upload", Some("video/webm"), None, b""))
            .await;
        assert_eq!(reply, IngestReply::new(StatusCode::OK, "Post OK"));
        assert!(!dir.path().join("test.webm").exists());
    }

    #[tokio::test]
    async fn test_sequenced_chunks_follow_naming() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        let bodies: [&[u8]; 4] = [b"<MPD/>", b"\x1a\x45\xdf\xa3", b"chunk-1", b"chunk-2"];
        for body in bodies {
            let reply = dispatcher
                .dispatch(request("/dash", Some("video/webm"), None, body))
                .await;
            assert_eq!(reply, IngestReply::new(StatusCode::OK, ""));
        }

        let read = |name: &str| std::fs::read(dir.path().join(name)).unwrap();
        assert_eq!(read("webmlive.mpd"), b"<MPD/>");
        assert_eq!(read("webmlive_webmlive.hdr"), b"\x1a\x45\xdf\xa3");
        assert_eq!(read("webmlive_webmlive_1.chk"), b"chunk-1");
        assert_eq!(read("webmlive_webmlive_2.chk"), b"chunk-2");
        assert_eq!(dispatcher.sequencer().current_index().await, 4);
    }

    #[tokio::test]
    async fn test_out_of_order_hint_is_sequence_error() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        let reply = dispatcher
            .dispatch(request(
                "/dash",
                Some("video/webm"),
                Some("webmlive_1.hdr"),
                b"header",
            ))
            .await;

        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(reply.body.contains("out of order"));
        assert_eq!(dispatcher.sequencer().current_index().await, 0);
        assert!(!dir.path().join("webmlive_webmlive.hdr").exists());
    }

    #[tokio::test]
    async fn test_truncated_chunk_leaves_index_free() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(10u64));
        let short: Vec<Chunk> = vec![Ok(Bytes::from_static(b"<MPD"))];
        let reply = dispatcher
            .dispatch(UploadRequest::new("/dash", headers, stream::iter(short)))
            .await;

        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(reply.body.starts_with("truncated body"));
        assert_eq!(dispatcher.sequencer().current_index().await, 0);

        // The retry lands on the same index.
        dispatcher
            .dispatch(request("/dash", None, None, b"<MPD/>"))
            .await;
        assert_eq!(
            std::fs::read(dir.path().join("webmlive.mpd")).unwrap(),
            b"<MPD/>"
        );
    }

    #[tokio::test]
    async fn test_content_id_mode_sanitizes_names() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with(dir.path(), |c| c.dash_mode = DashMode::ContentId);

        let reply = dispatcher
            .dispatch(request(
                "/dash",
                Some("video/webm"),
                Some("../../etc/passwd"),
                b"data",
            ))
            .await;
        assert_eq!(reply, IngestReply::new(StatusCode::OK, ""));
        assert_eq!(std::fs::read(dir.path().join("passwd")).unwrap(), b"data");

        let reply = dispatcher
            .dispatch(request("/dash", Some("video/webm"), Some("a/"), b"data"))
            .await;
        assert_eq!(
            reply,
            IngestReply::new(StatusCode::BAD_REQUEST, "empty content id")
        );

        let reply = dispatcher
            .dispatch(request("/dash", Some("video/webm"), None, b"data"))
            .await;
        assert_eq!(
            reply,
            IngestReply::new(StatusCode::BAD_REQUEST, "missing content id")
        );
    }

    #[tokio::test]
    async fn test_content_id_mode_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with(dir.path(), |c| c.dash_mode = DashMode::ContentId);

        for body in [&b"first version"[..], b"second"] {
            dispatcher
                .dispatch(request("/dash", None, Some("webmlive.mpd"), body))
                .await;
        }
        assert_eq!(
            std::fs::read(dir.path().join("webmlive.mpd")).unwrap(),
            b"second"
        );
    }

    #[tokio::test]
    async fn test_content_id_mode_keeps_separate_representations() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with(dir.path(), |c| c.dash_mode = DashMode::ContentId);

        let uploads: [(&str, &[u8]); 5] = [
            ("webmlive.mpd", b"<MPD/>"),
            ("webmlive_audio.hdr", b"audio header"),
            ("webmlive_video.hdr", b"video header"),
            ("webmlive_audio_1.chk", b"audio cluster"),
            ("webmlive_video_1.chk", b"video cluster"),
        ];
        for (id, body) in uploads {
            let reply = dispatcher
                .dispatch(request("/dash", Some("video/webm"), Some(id), body))
                .await;
            assert_eq!(reply.status, StatusCode::OK, "{id}: {}", reply.body);
        }
        for (id, body) in uploads {
            assert_eq!(std::fs::read(dir.path().join(id)).unwrap(), body);
        }
    }

    #[tokio::test]
    async fn test_content_id_mode_protects_raw_output() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with(dir.path(), |c| c.dash_mode = DashMode::ContentId);

        dispatcher
            .dispatch(request("/upload", Some("video/webm"), None, b"stream"))
            .await;
        let reply = dispatcher
            .dispatch(request("/dash", None, Some("test.webm"), b"clobber"))
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body, "reserved content id 'test.webm'");
        assert_eq!(
            std::fs::read(dir.path().join("test.webm")).unwrap(),
            b"stream"
        );

        let reply = dispatcher
            .dispatch(request("/dash", None, Some(".seg.chk.part"), b"x"))
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert!(!dir.path().join(".seg.chk.part").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dash_posts_keep_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(dispatcher(dir.path()));

        // The manifest upload takes the sequencer first and then stalls on its
        // body while the header upload waits behind it.
        let (tx, rx) = mpsc::unbounded::<Chunk>();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(6u64));
        let manifest = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(UploadRequest::new("/dash", headers, rx))
                    .await
            })
        };
        tx.unbounded_send(Ok(Bytes::from_static(b"<MP"))).unwrap();
        while !dispatcher.sequencer().is_busy() {
            tokio::task::yield_now().await;
        }

        let header = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(request("/dash", None, None, b"\x1a\x45\xdf\xa3"))
                    .await
            })
        };
        tokio::task::yield_now().await;
        tx.unbounded_send(Ok(Bytes::from_static(b"D/>"))).unwrap();

        assert!(manifest.await.unwrap().is_success());
        assert!(header.await.unwrap().is_success());

        assert_eq!(
            std::fs::read(dir.path().join("webmlive.mpd")).unwrap(),
            b"<MPD/>"
        );
        assert_eq!(
            std::fs::read(dir.path().join("webmlive_webmlive.hdr")).unwrap(),
            b"\x1a\x45\xdf\xa3"
        );
    }

    #[tokio::test]
    async fn test_prepare_output_removes_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out");
        let dispatcher = dispatcher_with(&out, |_| {});

        dispatcher.prepare_output().await.unwrap();
        assert!(out.is_dir());

        std::fs::write(out.join("test.webm"), b"stale").unwrap();
        dispatcher.prepare_output().await.unwrap();
        assert!(!out.join("test.webm").exists());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = IngestConfig {
            stream_name: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            IngestDispatcher::new(config),
            Err(Error::Configuration(_))
        ));
    }
}
