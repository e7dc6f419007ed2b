//! Small shared helpers.

use crate::error::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Split an address string of the form `proto!host-or-path!port-or-suffix`.
///
/// Recognized protocols are `"tcp"` and `"tls"`; anything else is passed
/// through unchanged for the transport layer to reject.
pub fn parse_proto(arg: &str) -> Option<(&str, &str, &str)> {
    let mut parts = arg.splitn(3, '!');
    let proto = parts.next()?;
    let addr = parts.next()?;
    let rest = parts.next()?;
    Some((proto, addr, rest))
}
