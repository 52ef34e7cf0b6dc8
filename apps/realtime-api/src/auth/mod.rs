pub mod principal;
pub mod restrictions;
pub mod tokens;
