use std::{process, sync::Arc};

use colored::Colorize;
use log::{error, info};
use thiserror::Error;
use tokio::runtime::{self, Runtime};

use crate::{
    clients::ClientRegistry,
    commands::CommandDispatcher,
    config::{Config, ConfigError},
    rooms::RoomManager,
    server::{ServerContext, ServerError},
    streams::StreamStore,
};

mod auth;
mod clients;
mod commands;
mod config;
mod events;
mod logging;
mod rooms;
mod server;
mod streams;
mod util;

pub struct Parlor {
    context: ServerContext,
    runtime: Runtime,
}

#[derive(Debug, Error)]
enum ParlorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl Parlor {
    fn new() -> Result<Self, ParlorError> {
        let config = Arc::new(Config::from_env()?);

        info!("building async runtime...");
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("parlor-async")
            .build()
            .map_err(|e| ParlorError::Fatal(e.to_string()))?;

        let clients = ClientRegistry::new();
        let rooms = RoomManager::new(&clients, config.room_grace);
        let streams = StreamStore::new(config.data_dir.clone());

        // No roles are configured out of the box, which leaves every
        // command permitted.
        let dispatcher = Arc::new(CommandDispatcher::new(None));

        Ok(Self {
            context: ServerContext {
                config,
                clients,
                rooms,
                streams,
                dispatcher,
            },
            runtime,
        })
    }

    fn run(&self) -> Result<(), ParlorError> {
        self.runtime.block_on(async {
            self.context.rooms.spawn_reaper();
            server::run_server(self.context.clone()).await
        })?;

        Ok(())
    }
}

impl ParlorError {
    fn hint(&self) -> String {
        match self {
            ParlorError::Config(_) => "Check the PARLOR_* environment variables.".to_string(),
            ParlorError::Server(ServerError::Bind { port, .. }) => {
                format!("Something else may already be listening on port {port}.")
            }
            _ => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

fn main() {
    logging::init_logger();

    let result = Parlor::new().and_then(|parlor| {
        info!("initialized successfully");
        parlor.run()
    });

    if let Err(error) = result {
        error!("{} {error}", "Parlor failed to start!".bold());
        error!("{}", format!("Hint: {}", error.hint()).italic());
        process::exit(1);
    }
}
