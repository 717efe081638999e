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

//! The three protocol endpoints (native binary, PostgreSQL-compatible, and
//! HTTP), and the read-deadline loop they share so shutdown is observed
//! promptly even while idle, per `spec.md` §4.5 and §5.

pub mod http;
pub mod native;
pub mod postgres;

use crate::codec::{ClientSignal, Codec};
use crate::error::Result;
use async_io::Timer;
use futures_lite::{future, AsyncRead, Unpin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Reads the next client signal from `source`, re-arming a `read_deadline`
/// timer on every iteration so a connection blocked on an idle socket still
/// notices `shutdown` going true within one deadline interval. Returns
/// `Ok(None)` once `shutdown` is observed.
pub async fn read_next_signal<R>(
    source: &mut R,
    codec: &Codec,
    read_deadline: Duration,
    shutdown: &AtomicBool,
) -> Result<Option<ClientSignal>>
where
    R: AsyncRead + Unpin,
{
    loop {
        let read = async { Ok(Some(codec.read_client(source).await?)) };
        let timeout = async {
            Timer::after(read_deadline).await;
            Ok(None)
        };
        match future::or(read, timeout).await {
            Ok(Some(signal)) => return Ok(Some(signal)),
            Ok(None) => {
                if shutdown.load(Ordering::SeqCst) {
                    return Ok(None);
                }
            }
            Err(error) => return Err(error),
        }
    }
}
