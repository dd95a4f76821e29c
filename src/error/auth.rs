use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unable to determine server type (expected RStudio Connect or Shiny Server Pro).")]
    UnknownServerType,
    #[error("Login did not set the expected '{cookie}' cookie.")]
    MissingAuthCookie { cookie: &'static str },
    #[error("Login request to {url} failed with status {status}.")]
    LoginStatus { url: String, status: u16 },
}
