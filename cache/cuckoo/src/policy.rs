//! Victim selection policy for displacement.
//!
//! A small closed set of variants dispatched by match. Selected once at
//! startup from configuration.

/// How to choose the victim slot when every candidate is occupied by a live
/// item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplacementPolicy {
    /// Pick a candidate uniformly at random.
    #[default]
    Random,

    /// Prefer the candidate with the nearest expiry; ties are broken at
    /// random. Items that never expire sort last.
    ExpireFirst,
}

impl std::str::FromStr for DisplacementPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(Self::Random),
            "expire_first" | "expire-first" => Ok(Self::ExpireFirst),
            _ => Err(format!(
                "unknown displacement policy: '{s}' (expected 'random' or 'expire_first')"
            )),
        }
    }
}
