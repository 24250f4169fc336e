pub mod admin;
pub mod error_map;
pub mod forward;
pub mod models;
pub mod server;
pub mod state;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use state::AppState;

/// Bind the combined client-facing and admin HTTP surface and serve until
/// `cancel` fires, then return once the listener has stopped accepting and
/// in-flight requests have drained (§5).
pub async fn serve(listener: TcpListener, state: AppState, cancel: CancellationToken) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "gateway listening");

    let app = Router::new()
        .merge(server::client_routes(state.clone()))
        .nest("/admin", admin::admin_routes(state))
        .layer(TraceLayer::new_for_http());

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("gateway server shut down");
    Ok(())
}
