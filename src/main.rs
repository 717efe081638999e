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

//! Standalone entry point. Wires the gateway up with
//! [`gateway::dispatch::fallback::FallbackStore`] as a stand-in for a real
//! Iceberg lakehouse, so the server has something to talk to out of the
//! box. Real deployments are expected to supply their own
//! [`gateway::ExecutionEngine`]/[`gateway::MetadataFacade`]/[`gateway::StorageFacade`].

use async_executor::Executor;
use gateway::collaborators::AllowAllAuthProvider;
use gateway::dispatch::fallback::FallbackStore;
use gateway::error::Result;
use gateway::{Config, Gateway};
use std::sync::Arc;

fn main() -> Result<()> {
    simple_logger::SimpleLogger::new().init().expect("initialize logger");

    let config = Config::default();
    let store = Arc::new(FallbackStore::new());
    let gateway = Gateway::new(
        config,
        store.clone(),
        store.clone(),
        store,
        Arc::new(AllowAllAuthProvider),
    )?;

    let executor = Executor::new();
    log::info!("starting lakehouse gateway");
    async_io::block_on(executor.run(gateway.run(&executor)))
}
