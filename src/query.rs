//! On-demand remote queries against a vision-language inference service.
//!
//! `QueryDispatcher::submit_query` takes one frame out of the live buffer (the
//! display stream never sees it), encodes it as JPEG and posts it with the
//! prompt as `multipart/form-data`:
//!
//! - `image`: JPEG bytes, filename `frame.jpeg`, content type `image/jpeg`
//! - `text`: the trimmed prompt
//!
//! The service answers `200 {"reply": ...}` or `400 {"error": ...}`. The
//! request is synchronous on the caller's thread.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::ImageFormat;
use serde::Deserialize;

use crate::augment::AugmentationOp;
use crate::controller::StreamController;
use crate::error::QueryError;
use crate::frame::Frame;
use crate::ingest::require_text;

const QUERY_FIELD: &str = "Llava Query";
const FRAME_WAIT_SLICE: Duration = Duration::from_millis(50);

/// Body returned by the inference service.
#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
pub struct InferenceReply {
    pub reply: Option<String>,
    pub error: Option<String>,
}

/// A queried frame and the service's description of it.
#[derive(Debug)]
pub struct QueryResult {
    pub frame: Frame,
    /// `None` when the service answered with something other than a JSON reply.
    pub reply: Option<String>,
}

/// Transport to the inference service.
pub trait InferenceClient: Send + Sync {
    /// Send one JPEG and prompt. `Ok(None)` means the service answered but the
    /// body held no usable reply.
    fn describe(&self, jpeg: &[u8], prompt: &str) -> Result<Option<String>, QueryError>;
}

impl<C: InferenceClient + ?Sized> InferenceClient for Arc<C> {
    fn describe(&self, jpeg: &[u8], prompt: &str) -> Result<Option<String>, QueryError> {
        (**self).describe(jpeg, prompt)
    }
}

/// `InferenceClient` over blocking HTTP.
#[derive(Clone, Debug)]
pub struct HttpInferenceClient {
    url: String,
    agent: ureq::Agent,
}

impl HttpInferenceClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl InferenceClient for HttpInferenceClient {
    fn describe(&self, jpeg: &[u8], prompt: &str) -> Result<Option<String>, QueryError> {
        let boundary = multipart_boundary();
        let body = multipart_body(&boundary, jpeg, prompt);
        log::debug!(
            "HttpInferenceClient: POST {} ({} byte image)",
            self.url,
            jpeg.len()
        );

        let response = self
            .agent
            .post(&self.url)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body);

        match response {
            Ok(response) => {
                let text = response
                    .into_string()
                    .map_err(|err| QueryError::Transport(err.to_string()))?;
                match serde_json::from_str::<InferenceReply>(&text) {
                    Ok(InferenceReply {
                        reply: Some(reply), ..
                    }) => Ok(Some(reply)),
                    Ok(_) => {
                        log::warn!("HttpInferenceClient: response has no reply field");
                        Ok(None)
                    }
                    Err(err) => {
                        log::warn!("HttpInferenceClient: reply is not in JSON format: {}", err);
                        Ok(None)
                    }
                }
            }
            Err(ureq::Error::Status(status, response)) => {
                let text = response.into_string().unwrap_or_default();
                let message = match serde_json::from_str::<InferenceReply>(&text) {
                    Ok(InferenceReply {
                        error: Some(message),
                        ..
                    })
                    | Ok(InferenceReply {
                        reply: Some(message),
                        ..
                    }) => message,
                    _ => text,
                };
                Err(QueryError::Rejected { status, message })
            }
            Err(ureq::Error::Transport(err)) => Err(QueryError::Transport(err.to_string())),
        }
    }
}

/// Random multipart boundary that will not appear in JPEG or prompt bytes in practice.
pub fn multipart_boundary() -> String {
    format!("----video-augment-{:016x}", rand::random::<u64>())
}

/// Build the `multipart/form-data` body for one query.
pub fn multipart_body(boundary: &str, jpeg: &[u8], prompt: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(jpeg.len() + prompt.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"frame.jpeg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(jpeg);
    body.extend_from_slice(
        format!(
            "\r\n--{boundary}\r\nContent-Disposition: form-data; name=\"text\"\r\n\r\n{prompt}\r\n\
             --{boundary}--\r\n"
        )
        .as_bytes(),
    );
    body
}

/// Encode a frame as baseline JPEG.
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>, QueryError> {
    let image = frame
        .to_image()
        .map_err(|err| QueryError::Encode(err.into()))?;
    let mut jpeg = Cursor::new(Vec::new());
    image
        .write_to(&mut jpeg, ImageFormat::Jpeg)
        .map_err(|err| QueryError::Encode(Box::new(err)))?;
    Ok(jpeg.into_inner())
}

pub struct QueryDispatcher<C = HttpInferenceClient> {
    controller: Arc<StreamController>,
    client: C,
}

impl QueryDispatcher<HttpInferenceClient> {
    pub fn over_http(controller: Arc<StreamController>, url: &str) -> Self {
        Self::new(controller, HttpInferenceClient::new(url))
    }
}

impl<C: InferenceClient> QueryDispatcher<C> {
    pub fn new(controller: Arc<StreamController>, client: C) -> Self {
        Self { controller, client }
    }

    /// Describe one live frame.
    ///
    /// Checks run in order (operation, running session, prompt) and each
    /// failure returns before any frame is taken or request made. The consumed
    /// frame is lost to the display stream, and also lost on transport errors.
    pub fn submit_query(&self, prompt: &str) -> Result<QueryResult, QueryError> {
        if self.controller.current_operation() != AugmentationOp::RemoteQuery {
            return Err(QueryError::WrongOperation);
        }
        let Some(handle) = self.controller.session_handle() else {
            log::warn!("{}", QueryError::NotRunning);
            return Err(QueryError::NotRunning);
        };
        let prompt = match require_text(Some(prompt), QUERY_FIELD) {
            Ok(prompt) => prompt,
            Err(err) => {
                log::warn!("{}", err);
                return Err(err.into());
            }
        };

        let frame = handle
            .wait_for_frame(FRAME_WAIT_SLICE)
            .ok_or(QueryError::SessionEnded)?;
        let jpeg = encode_jpeg(&frame)?;
        log::info!(
            "QueryDispatcher: session {} querying frame {} ({} bytes)",
            handle.session().id(),
            frame.sequence(),
            jpeg.len()
        );

        match self.client.describe(&jpeg, &prompt) {
            Ok(reply) => {
                if let Some(reply) = &reply {
                    log::info!("QueryDispatcher: reply of {} chars", reply.chars().count());
                }
                Ok(QueryResult { frame, reply })
            }
            Err(err) => {
                log::error!("QueryDispatcher: {}", err);
                Err(err)
            }
        }
    }
}
