// ABOUTME: HTTP/1 accept loop that serves the router with connection upgrades
// ABOUTME: Screens upgrade requests so refused ones lose their connection unanswered

use crate::api::upgrade::{screen_upgrade, RefusedUpgrade};
use axum::response::Response;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{debug, warn};

/// Serve `app` on `listener` until `shutdown` resolves, then wait for open
/// requests to finish.
///
/// A request that fails screening makes the connection error out, so the
/// client sees the transport close without any HTTP response.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F)
where
    F: Future<Output = ()>,
{
    let stop = CancellationToken::new();
    let connections = TaskTracker::new();
    tokio::pin!(shutdown);

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = &mut shutdown => break,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!("Accepted connection from {}", peer);
                connections.spawn(serve_connection(stream, app.clone(), stop.clone()));
            }
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    stop.cancel();
    connections.close();
    connections.wait().await;
}

async fn serve_connection(stream: TcpStream, app: Router, stop: CancellationToken) {
    let service = service_fn(move |request: Request<Incoming>| dispatch(app.clone(), request));
    let connection = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => Some(result),
        _ = stop.cancelled() => None,
    };
    let result = match result {
        Some(result) => result,
        None => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(e) = result {
        debug!("Connection closed: {}", e);
    }
}

async fn dispatch(app: Router, request: Request<Incoming>) -> Result<Response, RefusedUpgrade> {
    screen_upgrade(&request)?;
    match app.oneshot(request).await {
        Ok(response) => Ok(response),
        Err(never) => match never {},
    }
}
