//! # Bus subject conventions.
//!
//! Two subject spaces address every message on the bus:
//!
//! ```text
//! system.broadcast.<type_name>            every subscriber of the type
//! system.direct.<target_uid>.<type_name>  only the service with that uid
//! ```
//!
//! `<type_name>` is the canonical fully-qualified type name of the
//! application record. These are the only subject families the runtime
//! produces or consumes; deployments must not mix in alternative forms.

/// Prefix of the broadcast subject space.
pub const BROADCAST_PREFIX: &str = "system.broadcast.";

/// Prefix of the point-to-point subject space.
pub const DIRECT_PREFIX: &str = "system.direct.";

/// Builds the broadcast subject for a message type.
pub fn broadcast(type_name: &str) -> String {
    format!("{BROADCAST_PREFIX}{type_name}")
}

/// Builds the point-to-point subject for a target service uid and type.
pub fn direct(target_uid: &str, type_name: &str) -> String {
    format!("{DIRECT_PREFIX}{target_uid}.{type_name}")
}

/// Recovers the message type name from an inbound subject.
///
/// Accepts both subject families; point-to-point subjects must carry
/// `own_uid` as the target segment. Returns `None` for foreign subjects.
pub fn type_name_of<'a>(subject: &'a str, own_uid: &str) -> Option<&'a str> {
    if let Some(rest) = subject.strip_prefix(BROADCAST_PREFIX) {
        return (!rest.is_empty()).then_some(rest);
    }
    if let Some(rest) = subject.strip_prefix(DIRECT_PREFIX) {
        let rest = rest.strip_prefix(own_uid)?;
        let rest = rest.strip_prefix('.')?;
        return (!rest.is_empty()).then_some(rest);
    }
    None
}
