use wv_domain::error::Error;

/// Map a reqwest failure onto the shared error type. Timeouts keep their
/// own kind so the retry layer can tell them apart from hard failures.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
