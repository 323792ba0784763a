//! HTTP server loop: binds the configured address and dispatches every
//! request through `gateway_api::route`. Kept to exactly this — TLS
//! termination, WebDAV, and the rest of the gateway's outer HTTP
//! surface sit in front of this process in production.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::Server;

use gateway_api::state::ApiState;
use gateway_util::error::Error;

pub async fn serve(
	addr: SocketAddr,
	state: Arc<ApiState>,
	shutdown: impl std::future::Future<Output = ()>,
) -> Result<(), Error> {
	let make_svc = make_service_fn(move |_conn| {
		let state = state.clone();
		async move {
			Ok::<_, Infallible>(service_fn(move |req| {
				let state = state.clone();
				async move { Ok::<_, Infallible>(gateway_api::route(req, state).await) }
			}))
		}
	});

	info!("storage gateway listening on {}", addr);
	Server::bind(&addr)
		.serve(make_svc)
		.with_graceful_shutdown(shutdown)
		.await
		.map_err(|e| Error::Infrastructure(format!("http server error: {}", e)))
}
