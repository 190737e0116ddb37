//! Per-output display records.
//!
//! A [`Display`] is an immutable snapshot of one output as reported by the
//! display server. Records are rebuilt wholesale on every topology refresh
//! and never mutated in place; the listing tool's output is the single
//! source of truth.

use std::fmt;

use serde::Serialize;

/// One physical or virtual output as reported by the display server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Display {
    /// Stable output identifier, e.g. `"HDMI-1"` or `"VIRTUAL1"`.
    pub name: String,

    /// A physical sink is attached.
    pub connected: bool,

    /// System-designated primary output. At most one per snapshot.
    pub primary: bool,

    /// Currently driving a mode (has geometry).
    pub active: bool,

    /// Width in pixels. Only meaningful while `active`.
    pub width: u32,

    /// Height in pixels. Only meaningful while `active`.
    pub height: u32,

    /// Horizontal position in the global framebuffer layout.
    pub x_offset: i32,

    /// Vertical position in the global framebuffer layout.
    pub y_offset: i32,
}

impl Display {
    /// Creates an inactive, disconnected record with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: false,
            primary: false,
            active: false,
            width: 0,
            height: 0,
            x_offset: 0,
            y_offset: 0,
        }
    }

    /// Geometry as an `xrandr`-style clip rectangle, `WxH+X+Y`.
    pub fn clip(&self) -> String {
        format!(
            "{}x{}+{}+{}",
            self.width, self.height, self.x_offset, self.y_offset
        )
    }
}

impl fmt::Display for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.connected {
            write!(f, " connected")?;
        } else {
            write!(f, " disconnected")?;
        }
        if self.primary {
            write!(f, " primary")?;
        }
        if self.active {
            write!(f, " {}", self.clip())
        } else {
            write!(f, " not active")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_display() -> Display {
        Display {
            name: "HDMI-1".to_string(),
            connected: true,
            primary: true,
            active: true,
            width: 1920,
            height: 1080,
            x_offset: 1366,
            y_offset: 0,
        }
    }

    #[test]
    fn test_new_is_inactive() {
        let d = Display::new("VIRTUAL1");
        assert_eq!(d.name, "VIRTUAL1");
        assert!(!d.connected);
        assert!(!d.primary);
        assert!(!d.active);
        assert_eq!((d.width, d.height), (0, 0));
    }

    #[test]
    fn test_clip_format() {
        assert_eq!(active_display().clip(), "1920x1080+1366+0");
    }

    #[test]
    fn test_clip_with_negative_offset() {
        let mut d = active_display();
        d.x_offset = -1366;
        assert_eq!(d.clip(), "1920x1080+-1366+0");
    }

    #[test]
    fn test_display_format_active_primary() {
        assert_eq!(
            active_display().to_string(),
            "HDMI-1 connected primary 1920x1080+1366+0"
        );
    }

    #[test]
    fn test_display_format_inactive() {
        let d = Display::new("VIRTUAL1");
        assert_eq!(d.to_string(), "VIRTUAL1 disconnected not active");
    }

    #[test]
    fn test_serialize_to_json() {
        let json = serde_json::to_value(active_display()).unwrap();
        assert_eq!(json["name"], "HDMI-1");
        assert_eq!(json["width"], 1920);
        assert_eq!(json["primary"], true);
    }
}
