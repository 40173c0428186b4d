/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Kubernetes Access
//!
//! Client construction and retry policy shared by every cluster call.
//!
//! The `applier` submodule implements the resource store the
//! reconciliation engine writes through; `objects` holds the typed views
//! and label conventions for the managed collector resources.

use backoff::ExponentialBackoffBuilder;
use bifrost_utils::logging::prelude::*;
use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client, Error as KubeError};
use std::time::Duration;

pub mod applier;
pub mod objects;

/// Retry configuration for Kubernetes operations
pub(crate) struct RetryConfig {
    max_elapsed_time: Duration,
    initial_interval: Duration,
    max_interval: Duration,
    multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_elapsed_time: Duration::from_secs(60),
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(15),
            multiplier: 2.0,
        }
    }
}

/// Determines if a Kubernetes error is retryable
fn is_retryable_error(error: &KubeError) -> bool {
    match error {
        KubeError::Api(api_err) => {
            matches!(api_err.code, 429 | 500 | 503 | 504)
                || matches!(
                    api_err.reason.as_str(),
                    "ServiceUnavailable" | "InternalError" | "Timeout"
                )
        }
        _ => false,
    }
}

/// Executes a Kubernetes operation with exponential-backoff retries.
///
/// Only transient API statuses are retried; everything else surfaces
/// immediately as a permanent error.
pub(crate) async fn with_retries<F, Fut, T>(
    operation: F,
    config: RetryConfig,
) -> Result<T, KubeError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, KubeError>>,
{
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(config.initial_interval)
        .with_max_interval(config.max_interval)
        .with_multiplier(config.multiplier)
        .with_max_elapsed_time(Some(config.max_elapsed_time))
        .build();

    let operation_with_backoff = || async {
        match operation().await {
            Ok(value) => Ok(value),
            Err(error) => {
                if is_retryable_error(&error) {
                    warn!("Retryable error encountered: {}", error);
                    Err(backoff::Error::Transient {
                        err: error,
                        retry_after: None,
                    })
                } else {
                    Err(backoff::Error::Permanent(error))
                }
            }
        }
    };

    backoff::future::retry(backoff, operation_with_backoff).await
}

/// Creates a Kubernetes client using either a provided kubeconfig path or
/// the default configuration chain.
///
/// # Arguments
/// * `kubeconfig_path` - Optional path to kubeconfig file
///
/// # Returns
/// * `Result<Client, Box<dyn std::error::Error + Send + Sync>>` - Kubernetes client or error
pub async fn create_k8s_client(
    kubeconfig_path: Option<&str>,
) -> Result<Client, Box<dyn std::error::Error + Send + Sync>> {
    // Set KUBECONFIG environment variable if path is provided
    if let Some(path) = kubeconfig_path {
        std::env::set_var("KUBECONFIG", path);
    }

    let client = Client::try_default()
        .await
        .map_err(|e| format!("Failed to create Kubernetes client: {}", e))?;

    // Verify cluster connectivity by attempting to list namespaces
    let ns_api = Api::<Namespace>::all(client.clone());
    ns_api
        .list(&Default::default())
        .await
        .map_err(|e| format!("Failed to connect to Kubernetes cluster: {}", e))?;

    info!("Successfully connected to Kubernetes cluster");
    Ok(client)
}
