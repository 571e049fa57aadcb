use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use cancer_serve::Predictor;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use log::info;

use crate::routes;

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, predictor: Arc<Predictor>, shutdown: F) -> hyper::Result<()>
where
    F: Future<Output = ()>,
{
    // One service per connection, all sharing the same predictor.
    let make_service = make_service_fn(move |_conn: &AddrStream| {
        let predictor = Arc::clone(&predictor);

        let service = service_fn(move |req| routes::handle(req, Arc::clone(&predictor)));

        async move { Ok::<_, Infallible>(service) }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!("Server running on http://{}", server.local_addr());

    server.with_graceful_shutdown(shutdown).await
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler: run until killed.
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
