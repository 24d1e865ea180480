use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use super::traits::{HttpRequest, NetworkError, Transport};

type Reply = Result<String, NetworkError>;

/// Scriptable transport for testing.
///
/// Replies are matched by URL prefix. One-shot replies queued with
/// [`MockTransport::push_reply`] are consumed before standing routes set with
/// [`MockTransport::set_route`]. Unmatched requests get HTTP 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    one_shot: Mutex<Vec<(String, VecDeque<Reply>)>>,
    routes: Mutex<Vec<(String, Reply)>>,
    offline: AtomicBool,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request starting with `prefix` with `reply`.
    pub fn set_route(&self, prefix: impl Into<String>, reply: Reply) {
        let prefix = prefix.into();
        let mut routes = self.routes.lock();
        routes.retain(|(p, _)| *p != prefix);
        routes.push((prefix, reply));
    }

    /// Answer the next request starting with `prefix` with `reply`.
    pub fn push_reply(&self, prefix: impl Into<String>, reply: Reply) {
        let prefix = prefix.into();
        let mut one_shot = self.one_shot.lock();

        match one_shot.iter_mut().find(|(p, _)| *p == prefix) {
            Some((_, queue)) => queue.push_back(reply),
            None => one_shot.push((prefix, VecDeque::from([reply]))),
        }
    }

    /// Fail every request with a connection error while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Requests received so far (for assertions).
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests whose URL starts with `prefix`.
    pub fn request_count(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .count()
    }

    fn reply_for(&self, url: &str) -> Reply {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Connection {
                url: url.to_string(),
                reason: "offline".to_string(),
            });
        }

        {
            let mut one_shot = self.one_shot.lock();
            for (prefix, queue) in one_shot.iter_mut() {
                if url.starts_with(prefix.as_str()) {
                    if let Some(reply) = queue.pop_front() {
                        return reply;
                    }
                }
            }
        }

        self.routes
            .lock()
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| {
                Err(NetworkError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, request: &HttpRequest) -> Result<String, NetworkError> {
        self.requests.lock().push(request.clone());
        self.reply_for(&request.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_shot_before_route() {
        let transport = MockTransport::new();
        transport.set_route("https://a/", Ok("standing".to_string()));
        transport.push_reply("https://a/", Ok("first".to_string()));

        let req = HttpRequest::get("https://a/x");
        assert_eq!(transport.request(&req).await.unwrap(), "first");
        assert_eq!(transport.request(&req).await.unwrap(), "standing");
        assert_eq!(transport.request_count("https://a/"), 2);
    }

    #[tokio::test]
    async fn test_unmatched_and_offline() {
        let transport = MockTransport::new();
        transport.set_route("https://a/", Ok("ok".to_string()));

        let err = transport
            .request(&HttpRequest::get("https://b/"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));

        transport.set_offline(true);
        let err = transport
            .request(&HttpRequest::get("https://a/"))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Connection { .. }));
    }
}
