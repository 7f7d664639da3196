//! # HTTP Server
//!
//! HTTP/1 server built on Hyper and Tokio, driving a [`RequestHandler`].
//! Implements graceful shutdown with signal handling.
//!
//! Each request runs on its own task. The response reaches hyper through a
//! [`ChannelTransport`] as soon as it is sent, so the `Terminated` chain
//! runs after the client already has it.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::handler::{error_response, RequestHandler};
use crate::request::Request;
use crate::response::Response;
use crate::transport::{BufferTransport, ChannelTransport, Transport};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{error, info};

/// HTTP server
#[derive(Debug, Clone)]
pub struct Server {
    config: ServerConfig,
    handler: Arc<RequestHandler>,
}

impl Server {
    /// Create a new Server instance
    #[must_use]
    pub fn new(config: ServerConfig, handler: RequestHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    /// Server configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` if the socket cannot be bound.
    pub fn bind(&self) -> Result<TcpListener> {
        let address = self.config.address;
        let bind_error = |source| Error::BindError {
            address: address.to_string(),
            source,
        };

        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        #[cfg(not(windows))]
        socket.set_reuseport(true).map_err(bind_error)?;
        socket.bind(address).map_err(bind_error)?;
        socket.listen(1024).map_err(bind_error)
    }

    /// Serve until Ctrl-C, then drain in-flight connections
    ///
    /// # Errors
    ///
    /// Returns bind or accept errors.
    pub async fn serve(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` completes
    ///
    /// # Errors
    ///
    /// Returns accept errors.
    pub async fn serve_with_shutdown(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        info!(address = %listener.local_addr()?, "Server listening");

        let active = Arc::new(AtomicUsize::new(0));
        let max_body_size = self.config.max_body_size;
        let keep_alive = self.config.keep_alive;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = accepted?;
                    let io = TokioIo::new(stream);
                    let handler = self.handler.clone();
                    let active = active.clone();

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);
                        let service = service_fn(move |req| {
                            let handler = handler.clone();
                            async move {
                                let response = respond(handler, req, remote_addr, max_body_size).await;
                                Ok::<_, Infallible>(response.into_hyper())
                            }
                        });
                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service)
                            .await
                        {
                            error!(remote = %remote_addr, error = ?err, "Error serving connection");
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout(), drain).await.is_err() {
            info!(remaining = active.load(Ordering::Relaxed), "Shutdown timeout reached");
        }
        Ok(())
    }

    /// Execute a request directly without the network stack
    pub async fn test_request(&self, request: Request) -> Response {
        if request.body_bytes().map_or(0, <[u8]>::len) > self.config.max_body_size {
            return Response::error(413, "Payload Too Large");
        }
        let transport = BufferTransport::new();
        match self.handler.run(request, &transport).await {
            Ok(response) => response,
            Err(e) => debug_response(&e),
        }
    }
}

/// Body shown when debug mode re-raises a fault
fn debug_response(error: &Error) -> Response {
    Response::error(error.status(), &error.to_string())
}

async fn respond(
    handler: Arc<RequestHandler>,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let request = match Request::from_hyper_with_limit(req, max_body_size, Some(remote_addr)).await {
        Ok(request) => request,
        Err(e @ Error::PayloadTooLarge { .. }) => {
            info!(remote = %remote_addr, method = %method, path = %path, error = %e, "Request rejected");
            return Response::error(413, "Payload Too Large");
        }
        Err(e @ Error::MethodNotAllowed { .. }) => {
            info!(remote = %remote_addr, method = %method, path = %path, "Unsupported method");
            return error_response(&e);
        }
        Err(e) => {
            error!(remote = %remote_addr, method = %method, path = %path, error = %e, "Failed to parse request");
            return Response::error(400, "Bad Request");
        }
    };

    let (transport, receiver) = ChannelTransport::new();
    tokio::spawn(async move {
        if let Err(e) = handler.run(request, &transport).await {
            error!(error = %e, "Request failed");
            let _ = transport.send(debug_response(&e));
        }
    });

    let response = receiver.await.unwrap_or_else(|_| Response::server_error(None));
    info!(remote = %remote_addr, method = %method, path = %path, status = response.status, "Request served");
    response
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
