mod row;
mod row_filter;

pub use row::*;
pub use row_filter::*;
