//! The credential-vending port.
//!
//! A storage integration turns a catalog's storage configuration into
//! short-lived, location-scoped credentials. The cryptographic machinery
//! behind it (STS, signed URLs, workload identity) lives outside the core;
//! this module only fixes the call contract and provides a static test
//! double.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failure reported by a storage integration.
#[derive(Debug, thiserror::Error)]
#[error("storage integration error: {message}")]
pub struct IntegrationError {
    /// Description of the failure.
    pub message: String,
}

impl IntegrationError {
    /// Creates a new integration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Credentials scoped to a set of storage locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    /// Opaque credential key/value pairs handed to the storage client.
    pub credentials: BTreeMap<String, String>,
    /// When the credentials expire, if bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Vends sub-scoped credentials for a storage configuration.
#[async_trait]
pub trait StorageIntegration: Send + Sync {
    /// Returns credentials restricted to the supplied locations.
    ///
    /// At least one read or write location must be supplied; the catalog
    /// engine enforces this before calling.
    ///
    /// # Errors
    ///
    /// Returns an [`IntegrationError`] when the backing credential service
    /// rejects the request.
    async fn subscoped_creds(
        &self,
        storage_config: &str,
        allow_list_operation: bool,
        read_locations: &[String],
        write_locations: &[String],
    ) -> Result<AccessConfig, IntegrationError>;
}

/// Test double that echoes the requested scope back as credential entries.
#[derive(Debug, Default)]
pub struct StaticStorageIntegration;

#[async_trait]
impl StorageIntegration for StaticStorageIntegration {
    async fn subscoped_creds(
        &self,
        storage_config: &str,
        allow_list_operation: bool,
        read_locations: &[String],
        write_locations: &[String],
    ) -> Result<AccessConfig, IntegrationError> {
        if storage_config.is_empty() {
            return Err(IntegrationError::new("empty storage configuration"));
        }
        let mut credentials = BTreeMap::new();
        credentials.insert("read-locations".to_owned(), read_locations.join(","));
        credentials.insert("write-locations".to_owned(), write_locations.join(","));
        credentials.insert(
            "allow-list".to_owned(),
            allow_list_operation.to_string(),
        );
        Ok(AccessConfig {
            credentials,
            expires_at: None,
        })
    }
}
