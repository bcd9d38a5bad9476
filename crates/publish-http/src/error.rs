use grip_publish::TransportError;

#[allow(clippy::needless_pass_by_value)] // signature required for use with .map_err()
pub(crate) fn map_reqwest_err(e: reqwest::Error) -> TransportError {
    if e.is_connect() {
        TransportError::Connection(e.to_string())
    } else if e.is_status() || e.is_request() || e.is_body() {
        TransportError::Publish(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
