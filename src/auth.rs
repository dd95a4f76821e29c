//! Authentication probe for protected deployments.
//!
//! RStudio Connect and Shiny Server Pro both front protected apps with a
//! login endpoint; which one we are talking to is inferred from response
//! headers and cookies. A successful login primes the session's cookie jar,
//! which every subsequent HTTP request and the WebSocket handshake reuse.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderMap;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::{AppResult, AuthError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    Rsc,
    Ssp,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

static INPUT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b[^>]*>").expect("valid input-tag regex"));

static INPUT_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)([a-z0-9_-]+)\s*=\s*"([^"]*)""#).expect("valid attr regex"));

/// A gateway that hides the app behind a login answers the bare app URL
/// with 403 or 404.
///
/// # Errors
///
/// Returns an error if the probe request itself fails.
pub async fn is_protected(client: &Client, app_url: &Url) -> AppResult<bool> {
    let response = client.get(app_url.clone()).send().await?;
    let status = response.status().as_u16();
    Ok(status == 403 || status == 404)
}

/// Infer the server type from response headers and cookie names.
#[must_use]
pub fn detect_server(headers: &HeaderMap, cookie_names: &[String]) -> ServerType {
    if let Some(powered_by) = header_str(headers, "X-Powered-By") {
        if powered_by == "Express" || powered_by == "Shiny Server Pro" {
            return ServerType::Ssp;
        }
    }
    if headers.contains_key("rscid") {
        return ServerType::Rsc;
    }
    if let Some(server) = header_str(headers, "Server") {
        if server.starts_with("RStudio Connect") {
            return ServerType::Rsc;
        }
    }
    if cookie_names.iter().any(|name| name == "rscid") {
        return ServerType::Rsc;
    }
    ServerType::Unknown
}

/// Derive the login endpoint for the detected server type.
///
/// Connect mounts apps at `/content/<n>/...`; behind a reverse proxy the
/// login endpoint sits two path components up from the app. Shiny Server
/// Pro keeps it directly under the app path.
///
/// # Errors
///
/// Fails for [`ServerType::Unknown`].
pub fn login_url_for(app_url: &Url, server: ServerType) -> Result<Url, AuthError> {
    let path = match server {
        ServerType::Rsc => {
            let components: Vec<&str> = app_url
                .path()
                .split('/')
                .filter(|component| !component.is_empty())
                .collect();
            if components.len() > 2 {
                format!(
                    "/{}/__login__",
                    components[..components.len() - 2].join("/")
                )
            } else {
                "/__login__".to_owned()
            }
        }
        ServerType::Ssp => {
            format!("{}/__login__", app_url.path().trim_end_matches('/'))
        }
        ServerType::Unknown => return Err(AuthError::UnknownServerType),
    };

    let mut url = app_url.clone();
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}

/// Scrape `<input type="hidden">` fields from a login page.
///
/// Shiny Server Pro's form carries CSRF state in hidden inputs that must be
/// echoed back; Connect's JSON login needs none.
#[must_use]
pub fn hidden_inputs(body: &str) -> BTreeMap<String, String> {
    let mut inputs = BTreeMap::new();
    for tag in INPUT_TAG.find_iter(body) {
        let mut attributes = BTreeMap::new();
        for capture in INPUT_ATTR.captures_iter(tag.as_str()) {
            let key = capture[1].to_ascii_lowercase();
            attributes.insert(key, capture[2].to_owned());
        }
        if attributes.get("type").map(String::as_str) == Some("hidden") {
            if let Some(name) = attributes.get("name") {
                let value = attributes.get("value").cloned().unwrap_or_default();
                inputs.insert(name.clone(), value);
            }
        }
    }
    inputs
}

/// Detect the server type and log in, priming `jar` with the auth cookie.
///
/// # Errors
///
/// Fails when the server type cannot be determined, the login request is
/// rejected, or the expected auth cookie never appears in the jar.
pub async fn post_login(
    client: &Client,
    app_url: &Url,
    credentials: &Credentials,
    jar: &Jar,
) -> AppResult<()> {
    let response = client.get(app_url.clone()).send().await?;
    let cookie_names: Vec<String> = response
        .cookies()
        .map(|cookie| cookie.name().to_owned())
        .collect();
    let server = detect_server(response.headers(), &cookie_names);
    let body = response.text().await?;
    debug!("Detected server type {:?}", server);

    let login_url = login_url_for(app_url, server).map_err(crate::error::AppError::auth)?;
    match server {
        ServerType::Rsc => login_rsc(client, &login_url, credentials, jar, app_url).await,
        ServerType::Ssp => {
            let inputs = hidden_inputs(&body);
            login_ssp(client, &login_url, credentials, &inputs, jar, app_url).await
        }
        ServerType::Unknown => Err(AuthError::UnknownServerType.into()),
    }
}

async fn login_rsc(
    client: &Client,
    login_url: &Url,
    credentials: &Credentials,
    jar: &Jar,
    app_url: &Url,
) -> AppResult<()> {
    let payload = serde_json::json!({
        "username": credentials.user,
        "password": credentials.password,
    });
    let response = client.post(login_url.clone()).json(&payload).send().await?;
    check_login_status(login_url, response.status().as_u16())?;
    require_cookie(jar, app_url, "rsconnect")?;
    Ok(())
}

async fn login_ssp(
    client: &Client,
    login_url: &Url,
    credentials: &Credentials,
    inputs: &BTreeMap<String, String>,
    jar: &Jar,
    app_url: &Url,
) -> AppResult<()> {
    let mut form = inputs.clone();
    form.insert("username".to_owned(), credentials.user.clone());
    form.insert("password".to_owned(), credentials.password.clone());
    let response = client.post(login_url.clone()).form(&form).send().await?;
    check_login_status(login_url, response.status().as_u16())?;
    require_cookie(jar, app_url, "session_state")?;
    Ok(())
}

fn check_login_status(login_url: &Url, status: u16) -> Result<(), AuthError> {
    if status == 200 || status == 302 {
        Ok(())
    } else {
        Err(AuthError::LoginStatus {
            url: login_url.to_string(),
            status,
        })
    }
}

fn require_cookie(jar: &Jar, app_url: &Url, name: &'static str) -> Result<(), AuthError> {
    let missing = AuthError::MissingAuthCookie { cookie: name };
    let header = jar.cookies(app_url).ok_or(missing)?;
    let value = header
        .to_str()
        .map_err(|_| AuthError::MissingAuthCookie { cookie: name })?;
    let found = value
        .split(';')
        .any(|pair| pair.trim().split('=').next() == Some(name));
    if found {
        Ok(())
    } else {
        Err(AuthError::MissingAuthCookie { cookie: name })
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
