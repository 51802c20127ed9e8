//! Join kind, strictness and the key description of one join.

use std::fmt;

use serde::{Deserialize, Serialize};
use shardjoin_error::{JoinError, Result};

/// Which side's unmatched rows survive the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Matched pairs only.
    Inner,
    /// All probe rows; build columns NULL on miss.
    Left,
    /// All build rows; unmatched ones are emitted as non-joined rows.
    Right,
    /// Left and Right combined.
    Full,
}

impl JoinKind {
    #[must_use]
    pub const fn is_right_or_full(self) -> bool {
        matches!(self, Self::Right | Self::Full)
    }

    #[must_use]
    pub const fn is_left_or_full(self) -> bool {
        matches!(self, Self::Left | Self::Full)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inner => "INNER",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Full => "FULL",
        }
    }
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many build rows a probe row may pair with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrictness {
    /// Not resolved by the planner; probing treats it as `All`.
    #[default]
    Unspecified,
    /// At most one build row per key.
    Any,
    /// Every matching build row.
    All,
    /// Probe rows with at least one match, once each.
    Semi,
    /// Rows without a match.
    Anti,
    /// Equality on all keys but the last; closest build row not after the
    /// probe value on the last key.
    Asof,
}

impl JoinStrictness {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::Any => "ANY",
            Self::All => "ALL",
            Self::Semi => "SEMI",
            Self::Anti => "ANTI",
            Self::Asof => "ASOF",
        }
    }
}

impl fmt::Display for JoinStrictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind, strictness and key column names of one equi-join.
///
/// `build_keys[i]` is compared with `probe_keys[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableJoin {
    kind: JoinKind,
    strictness: JoinStrictness,
    build_keys: Vec<String>,
    probe_keys: Vec<String>,
}

impl TableJoin {
    /// # Errors
    ///
    /// Fails when key lists are empty or of different length, or when an
    /// AS-OF join is requested with fewer than two keys or an outer kind
    /// other than LEFT.
    pub fn new(
        kind: JoinKind,
        strictness: JoinStrictness,
        build_keys: Vec<String>,
        probe_keys: Vec<String>,
    ) -> Result<Self> {
        if build_keys.len() != probe_keys.len() {
            return Err(JoinError::KeyArityMismatch {
                build: build_keys.len(),
                probe: probe_keys.len(),
            });
        }
        if build_keys.is_empty() {
            return Err(JoinError::Unsupported {
                detail: "hash join requires at least one key column".to_owned(),
            });
        }
        if strictness == JoinStrictness::Asof {
            if build_keys.len() < 2 {
                return Err(JoinError::Unsupported {
                    detail: "ASOF join requires at least one equality key and one ASOF key"
                        .to_owned(),
                });
            }
            if kind.is_right_or_full() {
                return Err(JoinError::Unsupported {
                    detail: format!("{kind} ASOF join"),
                });
            }
        }
        Ok(Self {
            kind,
            strictness,
            build_keys,
            probe_keys,
        })
    }

    /// Convenience constructor for single-key joins.
    pub fn on(
        kind: JoinKind,
        strictness: JoinStrictness,
        build_key: &str,
        probe_key: &str,
    ) -> Result<Self> {
        Self::new(
            kind,
            strictness,
            vec![build_key.to_owned()],
            vec![probe_key.to_owned()],
        )
    }

    #[must_use]
    pub const fn kind(&self) -> JoinKind {
        self.kind
    }

    #[must_use]
    pub const fn strictness(&self) -> JoinStrictness {
        self.strictness
    }

    #[must_use]
    pub fn build_keys(&self) -> &[String] {
        &self.build_keys
    }

    #[must_use]
    pub fn probe_keys(&self) -> &[String] {
        &self.probe_keys
    }

    /// Number of leading keys compared for equality. For AS-OF joins the
    /// last key is the inequality column.
    #[must_use]
    pub fn equality_key_count(&self) -> usize {
        if self.strictness == JoinStrictness::Asof {
            self.build_keys.len() - 1
        } else {
            self.build_keys.len()
        }
    }

    /// True when probing can emit probe rows that found no build match.
    #[must_use]
    pub const fn emits_unmatched_probe_rows(&self) -> bool {
        match (self.kind, self.strictness) {
            (_, JoinStrictness::Semi) | (JoinKind::Right, JoinStrictness::Anti) => false,
            (_, JoinStrictness::Anti) => true,
            (kind, _) => kind.is_left_or_full(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn arity_mismatch_is_configuration_error() {
        let err = TableJoin::new(
            JoinKind::Inner,
            JoinStrictness::All,
            keys(&["a", "b"]),
            keys(&["a"]),
        )
        .unwrap_err();
        assert_eq!(err, JoinError::KeyArityMismatch { build: 2, probe: 1 });
    }

    #[test]
    fn asof_rules() {
        assert!(TableJoin::on(JoinKind::Inner, JoinStrictness::Asof, "t", "t").is_err());
        assert!(
            TableJoin::new(
                JoinKind::Right,
                JoinStrictness::Asof,
                keys(&["k", "t"]),
                keys(&["k", "t"])
            )
            .is_err()
        );
        let join = TableJoin::new(
            JoinKind::Left,
            JoinStrictness::Asof,
            keys(&["k", "t"]),
            keys(&["k", "t"]),
        )
        .unwrap();
        assert_eq!(join.equality_key_count(), 1);
    }

    #[test]
    fn unmatched_probe_row_emission() {
        let on = |kind, strictness| TableJoin::on(kind, strictness, "k", "k").unwrap();
        assert!(on(JoinKind::Left, JoinStrictness::All).emits_unmatched_probe_rows());
        assert!(on(JoinKind::Full, JoinStrictness::Any).emits_unmatched_probe_rows());
        assert!(on(JoinKind::Inner, JoinStrictness::Anti).emits_unmatched_probe_rows());
        assert!(!on(JoinKind::Inner, JoinStrictness::All).emits_unmatched_probe_rows());
        assert!(!on(JoinKind::Right, JoinStrictness::Anti).emits_unmatched_probe_rows());
        assert!(!on(JoinKind::Left, JoinStrictness::Semi).emits_unmatched_probe_rows());
    }

    #[test]
    fn serde_names_are_snake_case() {
        let json = serde_json::to_string(&JoinStrictness::Asof).unwrap();
        assert_eq!(json, "\"asof\"");
        let kind: JoinKind = serde_json::from_str("\"full\"").unwrap();
        assert_eq!(kind, JoinKind::Full);
    }
}
