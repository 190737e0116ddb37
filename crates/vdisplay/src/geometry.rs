//! Mode geometry and placement rules for the virtual screen.

use serde::Serialize;
use thiserror::Error;

/// Suffix appended to generated mode names so they can be told apart from
/// driver-provided modes.
pub const VIRT_MODE_SUFFIX: &str = "_virt";

/// Geometry and placement errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    /// The placement string is not one of `left`, `right`, `above`, `below`
    /// or empty.
    #[error("invalid position {0:?}; expected left, right, above, below or empty")]
    InvalidPosition(String),
}

/// Computes the effective virtual screen geometry for a request.
///
/// Portrait swaps width and height first; HiDPI doubles both afterwards,
/// so a portrait HiDPI request for `(w, h)` yields `(2*h, 2*w)`.
pub fn effective_geometry(width: u32, height: u32, portrait: bool, hidpi: bool) -> (u32, u32) {
    let (mut width, mut height) = if portrait {
        (height, width)
    } else {
        (width, height)
    };
    if hidpi {
        width *= 2;
        height *= 2;
    }
    (width, height)
}

/// Derives the mode name for an effective geometry, e.g. `1368x1024_virt`.
pub fn mode_name(width: u32, height: u32) -> String {
    format!("{width}x{height}{VIRT_MODE_SUFFIX}")
}

/// Placement of the virtual screen relative to the primary display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
    Above,
    Below,
}

impl Position {
    /// Parses a configured placement string.
    ///
    /// The empty string means "no placement requested" and maps to `None`;
    /// the caller falls back to the output's preferred placement. Anything
    /// other than the four relative keywords is an error.
    pub fn parse(value: &str) -> Result<Option<Self>, GeometryError> {
        match value {
            "" => Ok(None),
            "left" => Ok(Some(Self::Left)),
            "right" => Ok(Some(Self::Right)),
            "above" => Ok(Some(Self::Above)),
            "below" => Ok(Some(Self::Below)),
            other => Err(GeometryError::InvalidPosition(other.to_string())),
        }
    }

    /// The `xrandr` relative-placement flag for this position.
    pub fn xrandr_flag(&self) -> &'static str {
        match self {
            Self::Left => "--left-of",
            Self::Right => "--right-of",
            Self::Above => "--above",
            Self::Below => "--below",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_geometry_plain() {
        assert_eq!(effective_geometry(1368, 1024, false, false), (1368, 1024));
    }

    #[test]
    fn test_effective_geometry_portrait() {
        assert_eq!(effective_geometry(1368, 1024, true, false), (1024, 1368));
    }

    #[test]
    fn test_effective_geometry_hidpi() {
        assert_eq!(effective_geometry(1368, 1024, false, true), (2736, 2048));
    }

    #[test]
    fn test_effective_geometry_portrait_before_hidpi() {
        // The swap happens before doubling.
        assert_eq!(effective_geometry(1368, 1024, true, true), (2048, 2736));
    }

    #[test]
    fn test_mode_name_from_geometry() {
        let (w, h) = effective_geometry(1368, 1024, false, false);
        assert_eq!(mode_name(w, h), "1368x1024_virt");
        let (w, h) = effective_geometry(1368, 1024, true, true);
        assert_eq!(mode_name(w, h), "2048x2736_virt");
    }

    #[test]
    fn test_position_parse_keywords() {
        assert_eq!(Position::parse("left").unwrap(), Some(Position::Left));
        assert_eq!(Position::parse("right").unwrap(), Some(Position::Right));
        assert_eq!(Position::parse("above").unwrap(), Some(Position::Above));
        assert_eq!(Position::parse("below").unwrap(), Some(Position::Below));
    }

    #[test]
    fn test_position_parse_empty_is_unset() {
        assert_eq!(Position::parse("").unwrap(), None);
    }

    #[test]
    fn test_position_parse_rejects_unknown() {
        let err = Position::parse("diagonal").unwrap_err();
        assert_eq!(err, GeometryError::InvalidPosition("diagonal".to_string()));
    }

    #[test]
    fn test_position_parse_is_case_sensitive() {
        assert!(Position::parse("Left").is_err());
    }

    #[test]
    fn test_xrandr_flags() {
        assert_eq!(Position::Left.xrandr_flag(), "--left-of");
        assert_eq!(Position::Right.xrandr_flag(), "--right-of");
        assert_eq!(Position::Above.xrandr_flag(), "--above");
        assert_eq!(Position::Below.xrandr_flag(), "--below");
    }
}
