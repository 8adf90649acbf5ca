use std::thread;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestPolicy {
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) attempts: usize,
    pub(crate) retry_delay: Duration,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(5),
            attempts: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum HttpError {
    #[error("request failed after {attempts} attempt(s): HTTP status {status}{}", status_detail(.body))]
    Status {
        status: u16,
        body: String,
        attempts: usize,
    },
    #[error("request failed after {attempts} attempt(s): transport error: {message}")]
    Transport { message: String, attempts: usize },
    #[error("request failed: response decode failed: {0}")]
    Decode(String),
}

fn status_detail(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        String::new()
    } else {
        let truncated = body.chars().take(240).collect::<String>();
        format!(" ({truncated})")
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HttpResponse {
    pub(crate) body: String,
    headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Method<'a> {
    Get,
    PostForm(&'a [(String, String)]),
}

fn should_retry_http_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

pub(crate) fn send_with_retries(
    method: Method<'_>,
    url: &str,
    headers: &[(String, String)],
    policy: &RequestPolicy,
) -> Result<HttpResponse, HttpError> {
    let attempts = policy.attempts.max(1);
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(policy.connect_timeout)
        .timeout_read(policy.read_timeout)
        .timeout_write(policy.read_timeout)
        .build();

    for attempt in 1..=attempts {
        let mut request = match method {
            Method::Get => agent.get(url),
            Method::PostForm(_) => agent.post(url),
        };
        for (key, value) in headers {
            request = request.set(key, value);
        }

        let outcome = match method {
            Method::Get => request.call(),
            Method::PostForm(form) => {
                let pairs = form
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str()))
                    .collect::<Vec<_>>();
                request.send_form(&pairs)
            }
        };

        match outcome {
            Ok(response) => {
                let headers = response
                    .headers_names()
                    .into_iter()
                    .filter_map(|name| {
                        let value = response.header(&name)?.to_string();
                        Some((name, value))
                    })
                    .collect::<Vec<_>>();
                return match response.into_string() {
                    Ok(body) => Ok(HttpResponse { body, headers }),
                    Err(err) => Err(HttpError::Decode(err.to_string())),
                };
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().ok().unwrap_or_default();
                if should_retry_http_status(status) && attempt < attempts {
                    tracing::debug!(status, attempt, url, "retrying request");
                    thread::sleep(policy.retry_delay);
                    continue;
                }
                return Err(HttpError::Status {
                    status,
                    body,
                    attempts: attempt,
                });
            }
            Err(ureq::Error::Transport(err)) => {
                if attempt < attempts {
                    tracing::debug!(attempt, url, "transport error, retrying: {err}");
                    thread::sleep(policy.retry_delay);
                    continue;
                }
                return Err(HttpError::Transport {
                    message: err.to_string(),
                    attempts: attempt,
                });
            }
        }
    }

    Err(HttpError::Transport {
        message: "exhausted attempts without a concrete error".to_string(),
        attempts,
    })
}
