//! Application state management

use std::sync::Arc;

use crate::auth::Authorizer;
use crate::registry::FileRegistry;
use crate::resolver::Resolver;
use crate::upload::UploadService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    upload: UploadService,
    resolver: Resolver,
    authorizer: Arc<dyn Authorizer>,
}

impl AppState {
    /// Create a new application state
    ///
    /// The resolver reads the same registry the upload service writes.
    pub fn new(upload: UploadService, authorizer: Arc<dyn Authorizer>) -> Self {
        let resolver = Resolver::new(upload.registry().clone());

        Self {
            inner: Arc::new(AppStateInner {
                upload,
                resolver,
                authorizer,
            }),
        }
    }

    /// Get the upload service
    pub fn upload(&self) -> &UploadService {
        &self.inner.upload
    }

    /// Get the file registry
    pub fn registry(&self) -> &FileRegistry {
        self.inner.upload.registry()
    }

    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    pub fn authorizer(&self) -> Arc<dyn Authorizer> {
        Arc::clone(&self.inner.authorizer)
    }
}
