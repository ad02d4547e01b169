//! Safety rating model
//!
//! Boards classify content into three ordered levels. Providers report
//! their own rating vocabularies ("s", "questionable", "rating:explicit",
//! "general", ...) which are folded into [`Safety`] here.
//!
//! Ordering follows severity: `Safe < Sketchy < Unsafe`, so the strictest
//! of several ratings is simply the maximum.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Content safety rating as stored on the board
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Safety {
    #[default]
    Safe,
    Sketchy,
    Unsafe,
}

impl Safety {
    /// Board wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Safety::Safe => "safe",
            Safety::Sketchy => "sketchy",
            Safety::Unsafe => "unsafe",
        }
    }

    /// Convert a provider rating into a board safety level.
    ///
    /// Accepts single letters (`s`, `g`, `q`, `e`), full words in any case,
    /// and the `rating:` prefixed form used by ML vocabularies. Unknown or
    /// empty ratings yield `None` so callers can fall back to a default.
    pub fn from_rating(rating: &str) -> Option<Safety> {
        let rating = rating.trim().to_ascii_lowercase();
        let rating = rating.strip_prefix("rating:").unwrap_or(&rating);

        match rating {
            "s" | "g" | "safe" | "general" => Some(Safety::Safe),
            "q" | "questionable" | "sensitive" | "sketchy" => Some(Safety::Sketchy),
            "e" | "explicit" | "unsafe" => Some(Safety::Unsafe),
            _ => None,
        }
    }

    /// Strictest rating among the given inputs.
    ///
    /// Missing ratings are ignored; returns `None` when nothing was rated.
    pub fn strictest<I>(ratings: I) -> Option<Safety>
    where
        I: IntoIterator<Item = Option<Safety>>,
    {
        ratings.into_iter().flatten().max()
    }
}

impl fmt::Display for Safety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Safety {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Safety::from_rating(s).ok_or_else(|| Error::InvalidInput(format!("unknown safety rating: {s:?}")))
    }
}
