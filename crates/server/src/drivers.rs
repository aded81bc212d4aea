//! Warehouse driver registry.
//!
//! Dialect drivers are external adapters; the engine only knows the
//! `ConnectorFactory` contract. Deployments register one factory per
//! dialect they can reach; connecting through an unregistered dialect fails
//! with a recoverable error rather than a panic.

use aegis_core::{AegisError, Dialect, Result};
use aegis_engine::{ConnectorFactory, WarehouseConnector};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<Dialect, Arc<dyn ConnectorFactory>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, dialect: Dialect, factory: Arc<dyn ConnectorFactory>) {
        self.drivers.insert(dialect, factory);
    }
}

#[async_trait]
impl ConnectorFactory for DriverRegistry {
    async fn connect(&self, dialect: Dialect, uri: &str) -> Result<Box<dyn WarehouseConnector>> {
        match self.drivers.get(&dialect) {
            Some(factory) => factory.connect(dialect, uri).await,
            None => Err(AegisError::Unsupported(format!(
                "no {dialect} driver registered in this deployment"
            ))),
        }
    }
}
