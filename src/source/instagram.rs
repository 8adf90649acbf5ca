use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use super::feed::{body_requires_login, parse_reels_page, raw_requires_login};
use super::{ContentSource, Cursor, Page, SourceError};
use crate::config::Credentials;
use crate::db::{Database, DeviceIds};
use crate::http::{HttpError, Method, RequestPolicy, send_with_retries};

const APP_ID: &str = "567067343352427";
const USER_AGENT: &str = "Instagram 269.0.0.18.75 Android (26/8.0.0; 480dpi; 1080x1920; OnePlus; 6T Dev; devitron; qcom; en_US; 314665256)";

#[derive(Debug, Clone)]
struct ActiveSession {
    device: DeviceIds,
    authorization: String,
    user_id: Option<String>,
}

pub(crate) struct InstagramClient {
    credentials: Credentials,
    api_base: String,
    policy: RequestPolicy,
    store: Database,
    session: Option<ActiveSession>,
}

impl InstagramClient {
    pub(crate) fn new(credentials: Credentials, api_base: &str, store: Database) -> Self {
        Self {
            credentials,
            api_base: api_base.trim_end_matches('/').to_string(),
            policy: RequestPolicy::default(),
            store,
            session: None,
        }
    }

    #[cfg(test)]
    fn with_policy(mut self, policy: RequestPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[cfg(test)]
    fn store(&self) -> &Database {
        &self.store
    }

    /// Establish a session: a stored session is tried first, then a fresh
    /// credential login. The winning session is persisted for later runs.
    pub(crate) fn login(&mut self) -> Result<(), SourceError> {
        let username = self.credentials.username.clone();
        let stored = match self.store.load_session(&username) {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!("could not read stored session: {err:#}");
                None
            }
        };

        let mut session = None;
        if let Some(stored) = stored {
            tracing::info!(
                username = %stored.username,
                saved_at = %stored.saved_at,
                "attempting login via stored session"
            );
            let candidate = ActiveSession {
                device: stored.device,
                authorization: stored.authorization,
                user_id: stored.user_id,
            };
            match self.resume_session(candidate) {
                Ok(resumed) => session = Some(resumed),
                Err(err) => {
                    tracing::error!("couldn't log in using stored session information: {err}")
                }
            }
        }

        let session = match session {
            Some(session) => session,
            None => {
                tracing::info!(username = %username, "attempting login via username and password");
                self.password_login(DeviceIds::generate())
                    .map_err(|err| {
                        tracing::error!("couldn't log in using username and password: {err}");
                        SourceError::Auth(
                            "couldn't log in with either stored session or password".to_string(),
                        )
                    })?
            }
        };

        tracing::info!(username = %username, "login successful");
        if let Err(err) = self.store.save_session(
            &username,
            &session.device,
            &session.authorization,
            session.user_id.as_deref(),
        ) {
            tracing::warn!("failed to persist session: {err:#}");
        }
        self.session = Some(session);
        Ok(())
    }

    fn resume_session(&self, candidate: ActiveSession) -> Result<ActiveSession, SourceError> {
        match self.verify_session(&candidate) {
            Ok(()) => Ok(candidate),
            Err(SourceError::AuthRequired) => {
                tracing::warn!("stored session is invalid, logging in again on the same device");
                self.password_login(candidate.device)
            }
            Err(err) => Err(err),
        }
    }

    fn verify_session(&self, session: &ActiveSession) -> Result<(), SourceError> {
        send_with_retries(
            Method::Get,
            &self.endpoint("accounts/current_user/?edit=true"),
            &self.headers(&session.device, Some(&session.authorization)),
            &self.policy,
        )
        .map(|_| ())
        .map_err(classify_http_error)
    }

    fn password_login(&self, device: DeviceIds) -> Result<ActiveSession, SourceError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let form = vec![
            ("username".to_string(), self.credentials.username.clone()),
            (
                "enc_password".to_string(),
                format!("#PWD_INSTAGRAM:0:{timestamp}:{}", self.credentials.password),
            ),
            ("phone_id".to_string(), device.phone_id.clone()),
            ("guid".to_string(), device.uuid.clone()),
            ("device_id".to_string(), device.android_device_id.clone()),
            ("adid".to_string(), device.advertising_id.clone()),
            ("login_attempt_count".to_string(), "0".to_string()),
        ];

        let response = send_with_retries(
            Method::PostForm(&form),
            &self.endpoint("accounts/login/"),
            &self.headers(&device, None),
            &self.policy,
        )
        .map_err(|err| SourceError::Auth(login_failure_detail(&err)))?;

        let parsed: Value = serde_json::from_str(&response.body)
            .map_err(|err| SourceError::Auth(format!("invalid login response: {err}")))?;
        if parsed.get("two_factor_required").and_then(Value::as_bool) == Some(true) {
            return Err(SourceError::Auth(
                "two-factor login is not supported".to_string(),
            ));
        }
        let authorization = response
            .header("ig-set-authorization")
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                SourceError::Auth("login response carried no authorization token".to_string())
            })?
            .to_string();
        let user_id = parsed.pointer("/logged_in_user/pk").and_then(|pk| match pk {
            Value::Number(pk) => Some(pk.to_string()),
            Value::String(pk) => Some(pk.clone()),
            _ => None,
        });

        Ok(ActiveSession {
            device,
            authorization,
            user_id,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn headers(&self, device: &DeviceIds, authorization: Option<&str>) -> Vec<(String, String)> {
        let mut headers = vec![
            ("User-Agent".to_string(), USER_AGENT.to_string()),
            ("X-IG-App-ID".to_string(), APP_ID.to_string()),
            ("X-IG-Device-ID".to_string(), device.uuid.clone()),
            ("X-IG-Android-ID".to_string(), device.android_device_id.clone()),
            ("X-IG-App-Locale".to_string(), "en_US".to_string()),
        ];
        if let Some(authorization) = authorization {
            headers.push(("Authorization".to_string(), authorization.to_string()));
        }
        headers
    }
}

impl ContentSource for InstagramClient {
    fn fetch_page(&mut self, cursor: &Cursor, count: usize) -> Result<Page, SourceError> {
        let Some(session) = self.session.as_ref() else {
            return Err(SourceError::AuthRequired);
        };

        let mut form = vec![
            (
                "container_module".to_string(),
                "clips_viewer_clips_tab".to_string(),
            ),
            ("page_size".to_string(), count.to_string()),
            ("_uuid".to_string(), session.device.uuid.clone()),
        ];
        if let Some(max_id) = cursor.max_id() {
            form.push(("max_id".to_string(), max_id.to_string()));
        }
        tracing::debug!(cursor = %cursor, from_start = cursor.is_start(), count, "fetching reels page");

        let response = send_with_retries(
            Method::PostForm(&form),
            &self.endpoint("clips/discover/"),
            &self.headers(&session.device, Some(&session.authorization)),
            &self.policy,
        )
        .map_err(classify_http_error)?;

        parse_reels_page(&response.body, cursor, count)
    }

    fn reauthenticate(&mut self) -> Result<(), SourceError> {
        self.session = None;
        self.login()
    }
}

fn classify_http_error(err: HttpError) -> SourceError {
    match &err {
        HttpError::Status { status, .. } if *status == 401 || *status == 403 => {
            SourceError::AuthRequired
        }
        HttpError::Status { body, .. } if raw_requires_login(body) => SourceError::AuthRequired,
        _ => SourceError::Fetch(err.to_string()),
    }
}

fn login_failure_detail(err: &HttpError) -> String {
    if let HttpError::Status { body, .. } = err {
        if let Ok(parsed) = serde_json::from_str::<Value>(body) {
            if body_requires_login(&parsed) {
                return "login rejected, session required".to_string();
            }
            if let Some(message) = parsed.get("message").and_then(Value::as_str) {
                return format!("login rejected: {message}");
            }
        }
    }
    err.to_string()
}
