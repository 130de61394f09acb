use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};

use axum::{routing::get, Router};
use log::info;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    clients::ClientRegistry, commands::CommandDispatcher, config::Config, rooms::RoomManager,
    streams::StreamStore,
};

pub mod ws;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind to port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("server stopped unexpectedly: {0}")]
    Serve(std::io::Error),
}

/// The ambient state of the server, injected into every handler.
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<Config>,
    pub clients: Arc<ClientRegistry>,
    pub rooms: Arc<RoomManager>,
    pub streams: Arc<StreamStore>,
    pub dispatcher: Arc<CommandDispatcher>,
}

/// Binds the listener and serves the websocket gateway until shutdown.
pub async fn run_server(context: ServerContext) -> Result<(), ServerError> {
    let port = context.config.port;
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/v/:room", get(ws::gateway))
        .with_state(context)
        .layer(cors);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { port, source })?;

    info!("listening on {addr}");

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(ServerError::Serve)
}
