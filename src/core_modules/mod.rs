pub mod background_model;
pub mod contour;
pub mod contour_finder;
pub mod frame;
pub mod frame_source;
pub mod parameters;
pub mod polyline;
pub mod preprocessor;
pub mod tracker;
