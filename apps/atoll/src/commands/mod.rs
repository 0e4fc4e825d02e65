pub mod import;
pub mod search_replace;
