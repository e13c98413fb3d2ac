//! Channel identity codes.
//!
//! A trace belongs to a logical stream identified by the tuple
//! `(network, station, location, channel)`. The derived ordering compares
//! the fields in that order, which is the order used to group and sort
//! traces before merging.

use crate::error::TraceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network, station, location and channel codes of a trace.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Codes {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl Codes {
    /// Create codes from the four components.
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        location: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            location: location.into(),
            channel: channel.into(),
        }
    }

    /// Codes with only the channel set.
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// Network, station and location, the part shared by the components
    /// of one sensor.
    pub fn nsl(&self) -> (&str, &str, &str) {
        (&self.network, &self.station, &self.location)
    }

    /// Copy with a different channel code.
    pub fn with_channel(&self, channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..self.clone()
        }
    }

    /// Copy with a different location code.
    pub fn with_location(&self, location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..self.clone()
        }
    }

    /// Copy with a different station code.
    pub fn with_station(&self, station: impl Into<String>) -> Self {
        Self {
            station: station.into(),
            ..self.clone()
        }
    }
}

/// Partial replacement of codes; unset components are left unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodesUpdate {
    pub network: Option<String>,
    pub station: Option<String>,
    pub location: Option<String>,
    pub channel: Option<String>,
}

impl CodesUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn station(mut self, station: impl Into<String>) -> Self {
        self.station = Some(station.into());
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Apply the update to `codes`.
    pub fn apply(self, codes: &mut Codes) {
        if let Some(network) = self.network {
            codes.network = network;
        }
        if let Some(station) = self.station {
            codes.station = station;
        }
        if let Some(location) = self.location {
            codes.location = location;
        }
        if let Some(channel) = self.channel {
            codes.channel = channel;
        }
    }
}

impl fmt::Display for Codes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }
}

impl FromStr for Codes {
    type Err = TraceError;

    /// Parse the dotted `N.S.L.C` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [network, station, location, channel] => {
                Ok(Codes::new(*network, *station, *location, *channel))
            }
            _ => Err(TraceError::InvalidParameter(format!(
                "expected codes as NET.STA.LOC.CHA, got {s:?}"
            ))),
        }
    }
}

/// Combine the codes of two traces.
///
/// Components that agree are kept; differing components become
/// `"{a}{sep}{b}"`.
pub fn merge_codes(a: &Codes, b: &Codes, sep: &str) -> Codes {
    let merge = |x: &str, y: &str| {
        if x == y {
            x.to_string()
        } else {
            format!("{x}{sep}{y}")
        }
    };

    Codes {
        network: merge(&a.network, &b.network),
        station: merge(&a.station, &b.station),
        location: merge(&a.location, &b.location),
        channel: merge(&a.channel, &b.channel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_tuple_ordering() {
        let a = Codes::new("GE", "APE", "", "BHZ");
        let b = Codes::new("GE", "APE", "", "BHN");
        let c = Codes::new("DK", "COP", "", "BHZ");

        let mut codes = vec![a.clone(), b.clone(), c.clone()];
        codes.sort();
        assert_eq!(codes, vec![c, b, a]);
    }

    #[test]
    fn test_merge_codes() {
        let a = Codes::new("GE", "t1", "", "Z");
        let b = Codes::new("GE", "t2", "", "Z");
        let merged = merge_codes(&a, &b, "~");
        assert_eq!(merged, Codes::new("GE", "t1~t2", "", "Z"));
    }

    #[test]
    fn test_codes_update_partial() {
        let mut codes = Codes::new("GE", "APE", "", "BHZ");
        CodesUpdate::new().station("BOAB").channel("BHN").apply(&mut codes);
        assert_eq!(codes, Codes::new("GE", "BOAB", "", "BHN"));
    }

    #[test]
    fn test_display() {
        let codes = Codes::new("GE", "APE", "00", "BHZ");
        assert_eq!(codes.to_string(), "GE.APE.00.BHZ");
    }

    #[test]
    fn test_parse() {
        let codes: Codes = "GE.APE..BHZ".parse().unwrap();
        assert_eq!(codes, Codes::new("GE", "APE", "", "BHZ"));
        assert_eq!("...".parse::<Codes>().unwrap(), Codes::default());
        assert!("GE.APE.BHZ".parse::<Codes>().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let codes: Codes = serde_json::from_str(r#"{"station": "APE", "channel": "BHZ"}"#).unwrap();
        assert_eq!(codes, Codes::new("", "APE", "", "BHZ"));
    }
}
