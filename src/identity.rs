use crate::error::IdentityError;

/// Separator between the backend identity and the echoed payload.
pub const IDENTITY_SEPARATOR: u8 = b':';

/// Recover the backend identity from a `"<identity>:<echoed-payload>"` response.
///
/// Splits on the first colon. Fails when there is no colon, the identity is
/// empty, or the identity is not UTF-8.
pub fn extract_identity(response: &[u8]) -> Result<&str, IdentityError> {
    let malformed = |reason| IdentityError::MalformedResponse {
        reason,
        response: String::from_utf8_lossy(response).into_owned(),
    };

    let split = response
        .iter()
        .position(|&b| b == IDENTITY_SEPARATOR)
        .ok_or_else(|| malformed("no identity separator"))?;
    if split == 0 {
        return Err(malformed("empty identity"));
    }
    std::str::from_utf8(&response[..split]).map_err(|_| malformed("identity is not UTF-8"))
}
