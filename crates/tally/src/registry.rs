// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Token-keyed client instances.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;
use tracing::debug;

use crate::client::{TallyClient, TallyClientBuilder};
use crate::error::Result;

/// Maps project tokens to their clients, one client per token.
#[derive(Default)]
pub struct ClientRegistry {
	clients: RwLock<HashMap<String, TallyClient>>,
	init_lock: tokio::sync::Mutex<()>,
}

impl ClientRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// The process-wide registry.
	pub fn global() -> &'static ClientRegistry {
		static GLOBAL: OnceLock<ClientRegistry> = OnceLock::new();
		GLOBAL.get_or_init(ClientRegistry::new)
	}

	/// Returns the client for `token`, building it from `builder` on first use.
	///
	/// The builder's token is replaced by `token`. Concurrent first calls for
	/// the same token build exactly one client.
	pub async fn get_or_init(&self, token: &str, builder: TallyClientBuilder) -> Result<TallyClient> {
		if let Some(client) = self.get(token) {
			return Ok(client);
		}

		let _init = self.init_lock.lock().await;
		if let Some(client) = self.get(token) {
			return Ok(client);
		}

		let client = builder.token(token).build().await?;
		self.clients
			.write()
			.insert(token.to_string(), client.clone());
		debug!(token = %token, "registered client");
		Ok(client)
	}

	pub fn get(&self, token: &str) -> Option<TallyClient> {
		self.clients.read().get(token).cloned()
	}

	/// Removes a client from the registry. The client keeps running until
	/// shut down.
	pub fn remove(&self, token: &str) -> Option<TallyClient> {
		self.clients.write().remove(token)
	}

	pub fn len(&self) -> usize {
		self.clients.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.clients.read().is_empty()
	}
}
