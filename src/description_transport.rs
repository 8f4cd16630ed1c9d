//! Network side of description retrieval.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config::DescriptionConfig;
use crate::protocol::{FetchError, PageEvent, PageResponse};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Starts a retrieval whose result re-enters the page loop later as a
/// `PageEvent::DescriptionResponse`.
pub trait DescriptionTransport: Send {
    fn submit(&self, url: &str) -> Result<(), FetchError>;
}

/// Blocking GET client.
pub struct UreqTransport {
    http_client: ureq::Agent,
    user_agent: String,
}

impl UreqTransport {
    pub fn new(config: &DescriptionConfig) -> Self {
        let request_timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(request_timeout)
            .timeout_write(request_timeout)
            .build();
        Self {
            http_client,
            user_agent: config.user_agent.clone(),
        }
    }

    pub fn fetch_page(&self, url: &str) -> Result<PageResponse, FetchError> {
        let response = self
            .http_client
            .get(url)
            .set("User-Agent", &self.user_agent)
            .set("Accept", "text/html")
            .call()
            .map_err(|error| match error {
                ureq::Error::Status(code, _) => FetchError::Status(code),
                ureq::Error::Transport(transport) => FetchError::Transport(transport.to_string()),
            })?;
        let status = response.status();
        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|error| FetchError::Body(error.to_string()))?;
        debug!("Fetched {} ({} bytes, status {})", url, body.len(), status);
        Ok(PageResponse { status, body })
    }
}

/// Runs `UreqTransport` on tokio's blocking pool and posts the result back
/// over the page event channel.
pub struct ChannelTransport {
    client: Arc<UreqTransport>,
    events: mpsc::UnboundedSender<PageEvent>,
    runtime: Handle,
}

impl ChannelTransport {
    pub fn new(
        client: UreqTransport,
        events: mpsc::UnboundedSender<PageEvent>,
        runtime: Handle,
    ) -> Self {
        Self {
            client: Arc::new(client),
            events,
            runtime,
        }
    }
}

impl DescriptionTransport for ChannelTransport {
    fn submit(&self, url: &str) -> Result<(), FetchError> {
        if self.events.is_closed() {
            return Err(FetchError::Abandoned);
        }
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        let url = url.to_string();
        self.runtime.spawn_blocking(move || {
            let result = client.fetch_page(&url);
            // The page loop may already be gone.
            let _ = events.send(PageEvent::DescriptionResponse { url, result });
        });
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::DescriptionTransport;
    use crate::protocol::FetchError;

    /// Records submitted URLs; responses are delivered by the test.
    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        submitted: Arc<Mutex<Vec<String>>>,
        refuse: bool,
    }

    impl RecordingTransport {
        pub fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::default()
            }
        }

        pub fn submitted(&self) -> Vec<String> {
            self.submitted.lock().expect("transport lock").clone()
        }
    }

    impl DescriptionTransport for RecordingTransport {
        fn submit(&self, url: &str) -> Result<(), FetchError> {
            if self.refuse {
                return Err(FetchError::Transport("offline".to_string()));
            }
            self.submitted
                .lock()
                .expect("transport lock")
                .push(url.to_string());
            Ok(())
        }
    }
}
