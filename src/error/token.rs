use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Unknown token(s) {names} in '{input}'.")]
    Disallowed { input: String, names: String },
    #[error("No value for token(s) {names} in '{input}'.")]
    Missing { input: String, names: String },
}
