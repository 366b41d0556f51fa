//! Transparent capture decorator over any [`Transport`].

use std::sync::Arc;

use async_trait::async_trait;

use super::{HttpRequest, HttpResponse, Transport};
use crate::pipeline::CapturePipeline;
use crate::types::TransportError;

/// Wraps a transport and feeds matching responses to the capture pipeline.
///
/// Requests, responses and errors pass through untouched. An exchange is
/// processed at most once, by the outermost interceptor, even when
/// interceptors are stacked.
pub struct CaptureInterceptor<T> {
    inner: T,
    pipeline: Arc<CapturePipeline>,
}

impl<T> CaptureInterceptor<T> {
    pub fn new(inner: T, pipeline: Arc<CapturePipeline>) -> Self {
        Self { inner, pipeline }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn pipeline(&self) -> &Arc<CapturePipeline> {
        &self.pipeline
    }
}

#[async_trait]
impl<T: Transport> Transport for CaptureInterceptor<T> {
    async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let target = self.pipeline.layout().matches(&request.url) && request.claim_capture();
        let url = target.then(|| request.url.clone());

        let response = self.inner.send(request).await?;

        if let Some(url) = url {
            self.pipeline.observe(&url, &response.body);
        }
        Ok(response)
    }
}
