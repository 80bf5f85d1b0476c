//! Timeline state, date handling and temporal feature styling.

pub mod dates;
pub mod style;

pub use dates::{extract_date, is_date_shaped, parse_date_str, parse_date_value};
pub use style::{AnimationCursor, FadeWindow, FeatureStyle, TimelineState};
