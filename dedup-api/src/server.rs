use std::future::Future;

use axum::Router;
use eyre::{Result, WrapErr};

/// Serve `app` on `bind` until `shutdown` resolves, then drain open connections.
///
/// Failing to bind is an error, so the caller can exit non-zero.
pub async fn listen<F>(app: Router, bind: String, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .wrap_err_with(|| format!("could not bind {}", bind))?;
    tracing::info!("listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
