//! Topology snapshots parsed from `xrandr` listing output.
//!
//! A [`TopologySnapshot`] is the resolved view of one `xrandr` invocation:
//! the ordered list of outputs plus the indices of the primary display and
//! the configured virtual display. Snapshots are never patched in place; a
//! caller re-parses fresh listing output after every mutating command.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::display::Display;

/// Errors raised while resolving a parsed listing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// No output is flagged as primary.
    #[error("no primary display detected; set a primary display in the display settings first")]
    NoPrimaryDisplay,

    /// The configured virtual device name matched no output.
    #[error("no output named {name} found for the virtual screen")]
    VirtualDisplayNotFound {
        /// The configured device name.
        name: String,
    },

    /// The configured virtual device resolves to the primary display.
    #[error("the virtual screen must be an output other than the primary display")]
    VirtualEqualsPrimary,
}

/// One output per matching line:
/// `<name> (connected|disconnected) [primary] [<w>x<h>+<x>+<y>] ...`
fn output_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?m)^(\S+)\s+(connected|disconnected)\s+(?:(primary)\s+)?(?:(\d+)x(\d+)\+(-?\d+)\+(-?\d+)\s+)?.*$",
        )
        .expect("output line pattern is valid")
    })
}

/// An ordered set of parsed outputs with the primary and virtual entries
/// resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySnapshot {
    screens: Vec<Display>,
    primary_idx: usize,
    virt_idx: Option<usize>,
}

impl TopologySnapshot {
    /// Parses `xrandr` listing text into a resolved snapshot.
    ///
    /// `virt_name` is the configured virtual device name; `None` or an
    /// empty string leaves the virtual entry unresolved, which is valid as
    /// long as the caller checks [`TopologySnapshot::virt`] before use.
    ///
    /// If several lines carry the `primary` flag only the first one is
    /// honored; in practice the tool reports at most one.
    pub fn parse(output: &str, virt_name: Option<&str>) -> Result<Self, TopologyError> {
        let virt_name = virt_name.filter(|name| !name.is_empty());

        let mut screens = Vec::new();
        let mut primary_idx = None;
        let mut virt_idx = None;

        for (idx, caps) in output_line_pattern().captures_iter(output).enumerate() {
            let mut screen = Display::new(&caps[1]);
            if virt_name == Some(screen.name.as_str()) {
                virt_idx = Some(idx);
            }
            if caps.get(3).is_some() && primary_idx.is_none() {
                screen.primary = true;
                primary_idx = Some(idx);
            }
            screen.connected = &caps[2] == "connected";
            screen.active = caps.get(4).is_some();
            if screen.active {
                screen.width = caps[4].parse().unwrap_or(0);
                screen.height = caps[5].parse().unwrap_or(0);
                screen.x_offset = caps[6].parse().unwrap_or(0);
                screen.y_offset = caps[7].parse().unwrap_or(0);
            }
            screens.push(screen);
        }

        for screen in &screens {
            tracing::debug!(output = %screen, "parsed display");
        }

        let primary_idx = primary_idx.ok_or(TopologyError::NoPrimaryDisplay)?;
        if let Some(name) = virt_name {
            match virt_idx {
                Some(idx) if idx == primary_idx => return Err(TopologyError::VirtualEqualsPrimary),
                Some(_) => {}
                None => {
                    return Err(TopologyError::VirtualDisplayNotFound {
                        name: name.to_string(),
                    })
                }
            }
        }

        Ok(Self {
            screens,
            primary_idx,
            virt_idx,
        })
    }

    /// All parsed outputs, in listing order.
    pub fn screens(&self) -> &[Display] {
        &self.screens
    }

    /// The primary display.
    pub fn primary(&self) -> &Display {
        &self.screens[self.primary_idx]
    }

    /// The resolved virtual display, if a device name was configured.
    pub fn virt(&self) -> Option<&Display> {
        self.virt_idx.map(|idx| &self.screens[idx])
    }

    /// Consumes the snapshot, returning the parsed outputs.
    pub fn into_screens(self) -> Vec<Display> {
        self.screens
    }
}
