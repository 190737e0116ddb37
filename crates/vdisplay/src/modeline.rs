//! Timing extraction from the standard timing generator (`cvt`).
//!
//! `cvt <width> <height>` prints a commented header followed by a single
//! `Modeline "<name>" <params…>` line. Only the raw parameters after the
//! quoted name are of interest; they are passed verbatim to
//! `xrandr --newmode` when a virtual mode has to be registered first.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Errors raised while extracting a timing specification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelineError {
    /// The generator output contained no `Modeline` line.
    #[error("no Modeline found in timing generator output:\n{output}")]
    NoModeline {
        /// The captured generator output, for diagnosis.
        output: String,
    },
}

fn modeline_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?m)^.*Modeline\s*"[^"]*"\s*(.*)$"#).expect("modeline pattern is valid")
    })
}

/// Extracts the raw timing parameters from `cvt` output.
pub fn parse_modeline(output: &str) -> Result<String, ModelineError> {
    modeline_pattern()
        .captures(output)
        .map(|caps| caps[1].trim().to_string())
        .ok_or_else(|| ModelineError::NoModeline {
            output: output.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CVT_OUTPUT: &str = "\
# 1368x1024 59.88 Hz (CVT) hsync: 63.60 kHz; pclk: 116.25 MHz
Modeline \"1368x1024_59.88\"  116.25  1368 1448 1592 1816  1024 1027 1034 1063 -hsync +vsync
";

    #[test]
    fn test_parse_modeline_extracts_parameters() {
        let timing = parse_modeline(CVT_OUTPUT).unwrap();
        assert_eq!(
            timing,
            "116.25  1368 1448 1592 1816  1024 1027 1034 1063 -hsync +vsync"
        );
    }

    #[test]
    fn test_parse_modeline_starts_with_pixel_clock() {
        let timing = parse_modeline(CVT_OUTPUT).unwrap();
        let first = timing.split_whitespace().next().unwrap();
        assert!(first.parse::<f64>().is_ok());
    }

    #[test]
    fn test_parse_modeline_field_count() {
        // clock + 8 timing values + 2 sync flags
        let timing = parse_modeline(CVT_OUTPUT).unwrap();
        assert_eq!(timing.split_whitespace().count(), 11);
    }

    #[test]
    fn test_parse_modeline_missing_is_an_error() {
        let err = parse_modeline("cvt: command error\n").unwrap_err();
        assert!(matches!(err, ModelineError::NoModeline { .. }));
    }

    #[test]
    fn test_parse_modeline_error_carries_output() {
        let err = parse_modeline("unexpected output").unwrap_err();
        assert_eq!(
            err.to_string(),
            "no Modeline found in timing generator output:\nunexpected output"
        );
    }

    #[test]
    fn test_parse_modeline_ignores_comment_header() {
        // The header line mentions the geometry but carries no Modeline.
        let header_only = "# 1368x1024 59.88 Hz (CVT) hsync: 63.60 kHz; pclk: 116.25 MHz\n";
        assert!(parse_modeline(header_only).is_err());
    }
}
