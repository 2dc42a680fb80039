pub mod biomarker;
pub mod filters;
