//! Provider trait

use async_trait::async_trait;
use foreman_core::Result;
use futures::Stream;
use std::pin::Pin;

use crate::types::{ProviderEvent, QueryOptions};

/// Stream of events from one query
///
/// An `Err` item is a transport failure; the stream ends after it or after
/// a result event.
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent>> + Send>>;

/// Adapter to an AI coding-agent backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logs and routing
    fn name(&self) -> &str;

    /// Start a query. Nothing runs until the stream is polled.
    async fn execute_query(&self, options: QueryOptions) -> Result<ProviderStream>;

    /// Verify credentials are available without starting a query
    fn check_auth(&self) -> Result<()> {
        Ok(())
    }
}
