//! # VirtShare Display Library
//!
//! This crate provides the display-side domain types for VirtShare: the
//! display topology model, the parser for `xrandr` listing output, and the
//! geometry rules used to derive a virtual screen mode.
//!
//! ## Overview
//!
//! Everything in this crate is pure data and text processing. Running the
//! external display tools and supervising the VNC server live in the
//! `daemon` crate; this crate only interprets their output:
//!
//! - **Display Model**: one immutable snapshot record per output
//! - **Topology Parsing**: `xrandr` listing text into a resolved snapshot
//! - **Mode Geometry**: portrait/HiDPI geometry derivation and mode naming
//! - **Modeline Extraction**: raw timing parameters out of `cvt` output
//!
//! ## Example Usage
//!
//! ```rust
//! use vdisplay::{effective_geometry, mode_name, TopologySnapshot};
//!
//! let listing = "\
//! eDP-1 connected primary 1920x1080+0+0 (normal left inverted) 344mm x 194mm
//! VIRTUAL1 disconnected (normal left inverted right x axis y axis)
//! ";
//! let snapshot = TopologySnapshot::parse(listing, Some("VIRTUAL1")).unwrap();
//! assert_eq!(snapshot.primary().name, "eDP-1");
//!
//! let (w, h) = effective_geometry(1368, 1024, false, true);
//! assert_eq!(mode_name(w, h), "2736x2048_virt");
//! ```
//!
//! ## Modules
//!
//! - [`display`]: the per-output snapshot record
//! - [`topology`]: listing parser and resolved snapshot
//! - [`geometry`]: effective geometry, mode names, placement
//! - [`modeline`]: timing extraction from the standard timing generator

pub mod display;
pub mod geometry;
pub mod modeline;
pub mod topology;

pub use display::Display;
pub use geometry::{effective_geometry, mode_name, GeometryError, Position, VIRT_MODE_SUFFIX};
pub use modeline::{parse_modeline, ModelineError};
pub use topology::{TopologyError, TopologySnapshot};
