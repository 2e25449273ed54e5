//! JSON-RPC over HTTP POST, one request cycle per call

use std::convert::Infallible;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{ALLOW, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use wirerpc_core::{MessageBuffer, TransportType};

use crate::Result;
use crate::config::ServerConfig;
use crate::dispatcher::MethodRegistry;
use crate::protocol::Reply;
use crate::server::{ServerCore, Shared};

/// HTTP server.
///
/// Each POST body is handled as one or more delimited messages. A single
/// error reply sets the status from its error code; a body of notifications
/// only is answered with `204 No Content`.
#[derive(Debug)]
pub struct HttpServer {
    core: ServerCore,
}

impl HttpServer {
    pub fn new(config: ServerConfig, methods: MethodRegistry) -> Result<Self> {
        Ok(Self {
            core: ServerCore::new(config, methods)?,
        })
    }

    /// Start accepting connections, returning the bound address
    pub async fn listen(&self) -> Result<SocketAddr> {
        self.core.start(TransportType::Http, serve_connection).await
    }
}

impl Deref for HttpServer {
    type Target = ServerCore;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (info, _replies, _outbound) = shared.registry.register(peer, TransportType::Http);

    let io = TokioIo::new(stream);
    let handler_shared = shared.clone();
    let service = service_fn(move |req| {
        let shared = handler_shared.clone();
        async move { Ok::<_, Infallible>(handle_request(req, &shared).await) }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    let mut shutting_down = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    if err.is_incomplete_message() {
                        debug!(peer = %peer, "Client closed connection before completing a request");
                    } else {
                        error!(peer = %peer, error = %err, "Error serving connection");
                    }
                }
                break;
            }
            _ = shutdown.changed(), if !shutting_down => {
                shutting_down = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    shared.registry.remove(info.id);
}

async fn handle_request(req: Request<Incoming>, shared: &Shared) -> Response<Full<Bytes>> {
    if req.uri().path() != shared.config.path {
        return text_response(StatusCode::NOT_FOUND, "Not Found");
    }
    if req.method() != Method::POST {
        let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
        return response;
    }

    let body = match Limited::new(req.into_body(), shared.config.max_body_size)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(
                limit = shared.config.max_body_size,
                "Request body exceeds size limit"
            );
            return text_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large");
        }
        Err(err) => {
            debug!(error = %err, "Failed to read request body");
            return text_response(StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    let mut buffer = MessageBuffer::new(shared.protocol.delimiter());
    buffer.push_message(&body);
    let mut replies: Vec<Reply> = Vec::new();
    while let Some(message) = buffer.handle_data() {
        if let Some(reply) = shared.protocol.handle_message(&message).await {
            replies.push(reply);
        }
    }

    if replies.is_empty() {
        return empty_response(StatusCode::NO_CONTENT);
    }
    if let [reply] = replies.as_slice() {
        let status =
            StatusCode::from_u16(reply.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return json_response(status, reply.text.clone());
    }

    let body: String = replies.into_iter().map(|reply| reply.text).collect();
    json_response(StatusCode::OK, body)
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
