//! Pure mapping functions between the status/priority/type vocabularies of
//! the three systems, plus the free-text reference parsers.
//!
//! Everything here is total and side-effect free, so workflows may call these
//! directly without going through activities.

pub mod footer;
pub mod status;
pub mod title;

pub use footer::{
    append_footer, extract_huly_identifier, extract_parent_identifier, render_footer, strip_footer,
};
pub use status::{
    beads_to_huly_priority, beads_to_huly_status, huly_to_beads_priority, huly_to_beads_status,
    huly_to_vibe_status, vibe_to_huly_status,
};
pub use title::{TITLE_MATCH_MIN_LEN, normalize_title, titles_match};
