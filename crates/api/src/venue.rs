//! Trading venue identifiers.

use serde::{Deserialize, Serialize};

/// One of the two markets collateral can be sold on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Venue {
    MosEspa,
    BlackSpire,
}

impl Venue {
    /// Deterministic order; Mos Espa first is the documented tie-break.
    pub const ALL: [Venue; 2] = [Venue::MosEspa, Venue::BlackSpire];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MosEspa => "MOS_ESPA",
            Self::BlackSpire => "BLACK_SPIRE",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Venue::MosEspa).unwrap(), "\"MOS_ESPA\"");
        let v: Venue = serde_json::from_str("\"BLACK_SPIRE\"").unwrap();
        assert_eq!(v, Venue::BlackSpire);
    }
}
