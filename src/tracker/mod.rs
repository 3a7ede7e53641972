mod error;
mod request;
mod response;

use std::time::Duration;

use log::{debug, warn};
use url::Url;

use crate::bencoding::Parser;

pub use error::TrackerError;
pub use request::{Event, TrackerRequest};
pub use response::AnnounceResult;

/// HTTP tracker client. Every request is bounded by the timeout given at construction.
pub struct Tracker {
    http: reqwest::Client,
}

impl Tracker {
    pub fn new(timeout: Duration) -> Result<Self, TrackerError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    pub async fn announce(&self, request: &TrackerRequest) -> Result<AnnounceResult, TrackerError> {
        let url = Url::from(request);
        debug!("announcing to {}", request.announce);
        let mut response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(TrackerError::Status(response.status().as_u16()));
        }
        let mut parser = Parser::new();
        while let Some(chunk) = response.chunk().await? {
            parser.feed(&chunk)?;
        }
        let result = AnnounceResult::try_from(parser.result()?)?;
        if let Some(warning) = &result.warning {
            warn!("tracker warning: {}", warning);
        }
        Ok(result)
    }
}
