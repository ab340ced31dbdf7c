//! Signal channel addressing.

use std::fmt;
use std::path::PathBuf;

use crate::client::Identity;

/// Where a signal's values are served.
///
/// The address is a pure function of the producer identity and the signal
/// name: `<base>/<executable>.<process>.<signal>.sock`. The producer binds
/// it, consumers compute the identical path from the `created_by` field of
/// the signal record; nobody asks the registry for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalAddress {
    pub base_path: PathBuf,
    pub producer: Identity,
    pub signal: String,
}

impl SignalAddress {
    pub fn new(base_path: impl Into<PathBuf>, producer: Identity, signal: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            producer,
            signal: signal.into(),
        }
    }

    /// Socket path this address renders to.
    pub fn socket_path(&self) -> PathBuf {
        self.base_path
            .join(format!("{}.{}.sock", self.producer, self.signal))
    }
}

impl fmt::Display for SignalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_path().display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_follows_naming_convention() {
        let address = SignalAddress::new(
            "/tmp/patchbay",
            Identity::new("boiler", "def"),
            "temperature",
        );
        assert_eq!(
            address.socket_path(),
            PathBuf::from("/tmp/patchbay/boiler.def.temperature.sock")
        );
    }

    #[test]
    fn test_both_sides_compute_the_same_path() {
        let producer_side = SignalAddress::new(
            "/tmp/patchbay",
            Identity::new("boiler", "unit2"),
            "temperature",
        );
        let consumer_side = SignalAddress::new(
            "/tmp/patchbay",
            Identity::parse("boiler.unit2").unwrap(),
            "temperature",
        );
        assert_eq!(producer_side.socket_path(), consumer_side.socket_path());
    }
}
