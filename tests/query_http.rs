use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use video_augment::{
    AppConfig, AugmentationOp, HttpInferenceClient, InferenceClient, QueryDispatcher, QueryError,
    StartRequest, StreamController,
};

#[derive(Debug)]
struct ReceivedRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

struct FakeInferenceServer {
    url: String,
    requests: mpsc::Receiver<ReceivedRequest>,
    join: JoinHandle<()>,
}

impl FakeInferenceServer {
    /// Answer exactly one request with `status` and `body`.
    fn respond_once(status: u16, body: &'static str) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}/query", listener.local_addr()?);
        let (tx, rx) = mpsc::channel();
        let join = std::thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            match read_request(&mut stream) {
                Ok(request) => {
                    let _ = tx.send(request);
                    let _ = write_response(&mut stream, status, body);
                }
                Err(err) => eprintln!("fake inference server: {err}"),
            }
        });
        Ok(Self {
            url,
            requests: rx,
            join,
        })
    }

    fn received(self) -> Result<ReceivedRequest> {
        let request = self
            .requests
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| anyhow!("no request received"))?;
        self.join
            .join()
            .map_err(|_| anyhow!("fake server thread panicked"))?;
        Ok(request)
    }
}

fn read_request(stream: &mut TcpStream) -> Result<ReceivedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }

    Ok(ReceivedRequest {
        method: method.to_string(),
        path: path.to_string(),
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body.as_bytes())?;
    Ok(())
}

fn query_controller() -> Arc<StreamController> {
    let mut config = AppConfig {
        camera_address: "stub://cam?fps=200".to_string(),
        ..AppConfig::default()
    };
    config.capture.width = 64;
    config.capture.height = 48;
    config.stream.display_interval = Duration::from_millis(1);
    let controller = Arc::new(StreamController::new(&config));
    controller.select_operation(AugmentationOp::RemoteQuery);
    controller
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn query_posts_multipart_frame_and_returns_reply() -> Result<()> {
    let server = FakeInferenceServer::respond_once(200, r#"{"reply": "a striped test pattern"}"#)?;
    let controller = query_controller();
    let dispatcher = QueryDispatcher::over_http(controller.clone(), &server.url);
    let _stream = controller.start(StartRequest::default())?;

    let result = dispatcher.submit_query("  what is in the frame?  ")?;
    assert_eq!(result.reply.as_deref(), Some("a striped test pattern"));
    assert_eq!((result.frame.width, result.frame.height), (64, 48));
    controller.stop();

    let request = server.received()?;
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/query");
    let content_type = request
        .headers
        .get("content-type")
        .cloned()
        .unwrap_or_default();
    assert!(content_type.starts_with("multipart/form-data; boundary="));
    assert!(contains(
        &request.body,
        b"name=\"image\"; filename=\"frame.jpeg\"\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8"
    ));
    assert!(contains(
        &request.body,
        b"name=\"text\"\r\n\r\nwhat is in the frame?\r\n"
    ));
    Ok(())
}

#[test]
fn bad_request_surfaces_service_message() -> Result<()> {
    let server =
        FakeInferenceServer::respond_once(400, r#"{"error": "Image and text are required."}"#)?;
    let client = HttpInferenceClient::new(server.url.clone());

    let err = client
        .describe(&[0xFF, 0xD8, 0xFF, 0xD9], "hello")
        .expect_err("rejected");
    match err {
        QueryError::Rejected { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Image and text are required.");
        }
        other => return Err(anyhow!("unexpected error: {other}")),
    }
    server.received()?;
    Ok(())
}

#[test]
fn non_json_reply_yields_frame_without_reply() -> Result<()> {
    let server = FakeInferenceServer::respond_once(200, "<html>gateway</html>")?;
    let controller = query_controller();
    let dispatcher = QueryDispatcher::over_http(controller.clone(), &server.url);
    let _stream = controller.start(StartRequest::default())?;

    let result = dispatcher.submit_query("describe")?;
    assert!(result.reply.is_none());
    assert!(result.frame.sequence() >= 1);
    controller.stop();
    server.received()?;
    Ok(())
}

#[test]
fn unreachable_endpoint_is_a_transport_error() -> Result<()> {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let controller = query_controller();
    let dispatcher =
        QueryDispatcher::over_http(controller.clone(), &format!("http://127.0.0.1:{port}/query"));
    let _stream = controller.start(StartRequest::default())?;

    let err = dispatcher
        .submit_query("describe")
        .expect_err("transport failure");
    assert!(matches!(err, QueryError::Transport(_)));
    controller.stop();
    Ok(())
}

#[test]
fn query_after_source_is_exhausted_reports_session_end() -> Result<()> {
    let mut config = AppConfig {
        camera_address: "stub://cam?frames=1".to_string(),
        ..AppConfig::default()
    };
    config.stream.display_interval = Duration::from_millis(1);
    let controller = Arc::new(StreamController::new(&config));
    controller.select_operation(AugmentationOp::RemoteQuery);
    let dispatcher = QueryDispatcher::over_http(controller.clone(), "http://127.0.0.1:9/query");

    let mut stream = controller
        .start(StartRequest::default())?
        .expect("new session");
    assert!(stream.next().is_some());
    assert!(stream.next().is_none());

    let err = dispatcher
        .submit_query("anything left?")
        .expect_err("session ended");
    assert!(matches!(err, QueryError::SessionEnded));
    controller.stop();
    Ok(())
}
