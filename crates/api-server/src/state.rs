//! Application state

use std::sync::Arc;

use smartgrid_core::access::AccessResolver;
use smartgrid_core::billing::BillingStore;
use smartgrid_core::directory::DirectoryStore;
use smartgrid_core::tenancy::TenancyStore;

use crate::config::Config;
use crate::mirror::MirrorClient;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    resolver: AccessResolver,
    mirror: MirrorClient,
    config: Config,
}

impl AppState {
    /// Create a new AppState, building every store under the configured
    /// data directory.
    pub async fn new(config: Config) -> smartgrid_core::Result<Self> {
        let directory = DirectoryStore::new(config.data_dir.clone()).await?;
        let tenancy = TenancyStore::new(config.data_dir.clone()).await?;
        let billing = BillingStore::new(config.data_dir.clone()).await?;
        let resolver = AccessResolver::new(directory, tenancy, billing);
        let mirror = MirrorClient::new(config.mirror_url.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                resolver,
                mirror,
                config,
            }),
        })
    }

    pub fn resolver(&self) -> &AccessResolver {
        &self.inner.resolver
    }

    pub fn mirror(&self) -> &MirrorClient {
        &self.inner.mirror
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}
