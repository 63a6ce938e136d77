//! Build-time metadata generated by `build.rs` via the `built` crate:
//! package version, git commit, and target triple, surfaced through
//! `--version`.

include!(concat!(env!("OUT_DIR"), "/built.rs"));
