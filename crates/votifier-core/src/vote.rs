//! The vote record carried by the protocol.

use std::fmt;

/// A single vote notification.
///
/// Every field is free-form text and optional.  On the wire an absent field
/// still occupies its line as an empty string, so a vote that was encoded
/// with `None` decodes back with `Some(String::new())`.  Use
/// [`Vote::service_name_or_empty`] and friends when the distinction does not
/// matter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vote {
    /// Name of the voting site or service that sent the notification.
    pub service_name: Option<String>,
    /// Player / user name that voted.
    pub user_name: Option<String>,
    /// Address of the voter as reported by the service.
    pub address: Option<String>,
    /// Sender-defined timestamp; the format is not interpreted.
    pub time_stamp: Option<String>,
}

impl Vote {
    /// Builds a vote with all four fields present.
    pub fn new(
        service_name: impl Into<String>,
        user_name: impl Into<String>,
        address: impl Into<String>,
        time_stamp: impl Into<String>,
    ) -> Self {
        Self {
            service_name: Some(service_name.into()),
            user_name: Some(user_name.into()),
            address: Some(address.into()),
            time_stamp: Some(time_stamp.into()),
        }
    }

    pub fn service_name_or_empty(&self) -> &str {
        self.service_name.as_deref().unwrap_or("")
    }

    pub fn user_name_or_empty(&self) -> &str {
        self.user_name.as_deref().unwrap_or("")
    }

    pub fn address_or_empty(&self) -> &str {
        self.address.as_deref().unwrap_or("")
    }

    pub fn time_stamp_or_empty(&self) -> &str {
        self.time_stamp.as_deref().unwrap_or("")
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vote from {} for {} ({}) at {}",
            self.service_name_or_empty(),
            self.user_name_or_empty(),
            self.address_or_empty(),
            self.time_stamp_or_empty()
        )
    }
}
