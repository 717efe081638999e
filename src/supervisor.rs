// Copyright 2020 Alex Dukhno
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The gateway supervisor: builds the shared collaborators once, starts
//! the three endpoint listeners, and coordinates graceful shutdown, per
//! `spec.md` §4.7.

use crate::codec::{Codec, Registry};
use crate::collaborators::{AuthProvider, ExecutionEngine, MetadataFacade, StorageFacade};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::endpoints::http::HttpConnectionHandler;
use crate::endpoints::native::NativeConnectionHandler;
use crate::endpoints::postgres::PostgresConnectionHandler;
use crate::error::{GatewayError, Result};
use crate::middleware::auth::AuthenticatorMiddleware;
use crate::middleware::circuit_breaker::CircuitBreakerMiddleware;
use crate::middleware::pool::ConnectionPoolMiddleware;
use crate::middleware::MiddlewareChain;
use async_executor::Executor;
use async_io::Async;
use futures_lite::future;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owns every long-lived collaborator the endpoints share, and drives the
/// accept loops for each enabled endpoint.
pub struct Gateway {
    config: Config,
    codec: Arc<Codec>,
    middleware: Arc<MiddlewareChain>,
    pool: Arc<ConnectionPoolMiddleware>,
    dispatcher: Arc<Dispatcher>,
    auth_provider: Arc<dyn AuthProvider>,
    storage: Arc<dyn StorageFacade>,
    shutdown: Arc<AtomicBool>,
}

impl Gateway {
    /// Builds a gateway over `config` and the embedder's collaborators.
    /// Constructs the signal registry once, per `spec.md` §5.
    pub fn new(
        config: Config,
        engine: Arc<dyn ExecutionEngine>,
        metadata: Arc<dyn MetadataFacade>,
        storage: Arc<dyn StorageFacade>,
        auth_provider: Arc<dyn AuthProvider>,
    ) -> Result<Self> {
        let registry = Registry::with_builtin_signals()?;
        let codec = Arc::new(Codec::new(Arc::new(registry), config.max_payload_bytes));

        let pool = Arc::new(ConnectionPoolMiddleware::new(config.max_connections));
        let mut middleware = MiddlewareChain::new();
        middleware.push(pool.clone());
        middleware.push(Arc::new(AuthenticatorMiddleware::new()));
        middleware.push(Arc::new(CircuitBreakerMiddleware::new(config.circuit_breaker.clone())));

        let dispatcher = Arc::new(
            Dispatcher::new(engine, metadata)
                .with_storage(storage.clone())
                .with_resource_limits(config.resource_limits.clone()),
        );

        Ok(Gateway {
            config,
            codec,
            middleware: Arc::new(middleware),
            pool,
            dispatcher,
            auth_provider,
            storage,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Signals every accept loop and in-flight connection to wind down. The
    /// accept loops observe this promptly (within one `read_deadline`
    /// interval); callers typically pair this with a sleep for
    /// `shutdown_grace_period` before exiting the process.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Runs every enabled endpoint's accept loop on `executor` until
    /// shutdown is requested. Returns once all accept loops have exited.
    pub async fn run(&self, executor: &Executor<'_>) -> Result<()> {
        let mut tasks = Vec::new();

        if self.config.native.enabled {
            let listener = bind(&self.config.native.bind_address, self.config.native.port)?;
            let handler = Arc::new(NativeConnectionHandler::new(
                self.codec.clone(),
                self.middleware.clone(),
                self.dispatcher.clone(),
                self.auth_provider.clone(),
                self.storage.clone(),
                self.config.auth_enabled,
                self.config.read_deadline,
            ));
            let shutdown = self.shutdown.clone();
            tasks.push(executor.spawn(accept_loop_native(listener, handler, shutdown, executor)));
        }

        if self.config.postgres.enabled {
            let listener = bind(&self.config.postgres.bind_address, self.config.postgres.port)?;
            let handler = Arc::new(PostgresConnectionHandler::new(
                self.middleware.clone(),
                self.dispatcher.clone(),
                self.config.read_deadline,
            ));
            let shutdown = self.shutdown.clone();
            tasks.push(executor.spawn(accept_loop_postgres(listener, handler, shutdown, executor)));
        }

        if self.config.http.enabled {
            let listener = bind(&self.config.http.bind_address, self.config.http.port)?;
            let handler = Arc::new(HttpConnectionHandler::new(self.pool.clone()));
            let shutdown = self.shutdown.clone();
            tasks.push(executor.spawn(accept_loop_http(listener, handler, shutdown, executor)));
        }

        for task in tasks {
            task.await;
        }
        Ok(())
    }
}

fn bind(address: &str, port: u16) -> Result<Async<TcpListener>> {
    let listener = TcpListener::bind((address, port)).map_err(GatewayError::from)?;
    Async::new(listener).map_err(GatewayError::from)
}

async fn accept_with_deadline(listener: &Async<TcpListener>, shutdown: &AtomicBool) -> Option<Async<std::net::TcpStream>> {
    loop {
        let accept = async { Some(listener.accept().await) };
        let timeout = async {
            async_io::Timer::after(std::time::Duration::from_millis(100)).await;
            None
        };
        match future::or(accept, timeout).await {
            Some(Ok((stream, _addr))) => return Some(stream),
            Some(Err(_)) => return None,
            None => {
                if shutdown.load(Ordering::SeqCst) {
                    return None;
                }
            }
        }
    }
}

async fn accept_loop_native(
    listener: Async<TcpListener>,
    handler: Arc<NativeConnectionHandler>,
    shutdown: Arc<AtomicBool>,
    executor: &Executor<'_>,
) {
    while let Some(stream) = accept_with_deadline(&listener, &shutdown).await {
        let peer = stream
            .get_ref()
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_owned());
        let handler = handler.clone();
        let shutdown = shutdown.clone();
        executor
            .spawn(async move {
                if let Err(error) = handler.handle(stream, peer, &shutdown).await {
                    log::warn!("native connection ended with error: {}", error);
                }
            })
            .detach();
    }
}

async fn accept_loop_postgres(
    listener: Async<TcpListener>,
    handler: Arc<PostgresConnectionHandler>,
    shutdown: Arc<AtomicBool>,
    executor: &Executor<'_>,
) {
    while let Some(stream) = accept_with_deadline(&listener, &shutdown).await {
        let peer = stream
            .get_ref()
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_owned());
        let handler = handler.clone();
        let shutdown = shutdown.clone();
        executor
            .spawn(async move {
                if let Err(error) = handler.handle(stream, peer, &shutdown).await {
                    log::warn!("postgres connection ended with error: {}", error);
                }
            })
            .detach();
    }
}

async fn accept_loop_http(
    listener: Async<TcpListener>,
    handler: Arc<HttpConnectionHandler>,
    shutdown: Arc<AtomicBool>,
    executor: &Executor<'_>,
) {
    while let Some(stream) = accept_with_deadline(&listener, &shutdown).await {
        let handler = handler.clone();
        executor
            .spawn(async move {
                if let Err(error) = handler.handle(stream).await {
                    log::warn!("http connection ended with error: {}", error);
                }
            })
            .detach();
    }
}
