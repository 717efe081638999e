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

//! Admission control over the number of live connections, per `spec.md`
//! §4.4 and §5's `max_connections` cap.

use crate::context::ConnectionContext;
use crate::error::Result;
use crate::middleware::Middleware;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rejects new connections once `max_connections` are already admitted, and
/// releases its slot on disconnect.
pub struct ConnectionPoolMiddleware {
    max_connections: usize,
    admitted: AtomicUsize,
}

impl ConnectionPoolMiddleware {
    /// Builds a pool admitting at most `max_connections` concurrently.
    pub fn new(max_connections: usize) -> Self {
        ConnectionPoolMiddleware {
            max_connections,
            admitted: AtomicUsize::new(0),
        }
    }

    /// Number of connections currently admitted.
    pub fn admitted_count(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Middleware for ConnectionPoolMiddleware {
    fn name(&self) -> &'static str {
        "connection_pool"
    }

    async fn on_connect(&self, _context: &mut ConnectionContext) -> Result<()> {
        loop {
            let current = self.admitted.load(Ordering::SeqCst);
            if current >= self.max_connections {
                return Err(crate::error::GatewayError::connection_pool_full(self.max_connections));
            }
            if self
                .admitted
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    async fn on_disconnect(&self, _context: &ConnectionContext) {
        self.admitted.fetch_sub(1, Ordering::SeqCst);
    }
}
