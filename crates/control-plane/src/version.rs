//! Build-time version metadata generated by `build.rs`.

include!(concat!(env!("OUT_DIR"), "/version.rs"));
