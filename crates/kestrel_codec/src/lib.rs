//! Binary row codec and the per-table compression transform.

pub mod compress;
pub mod row;

pub use compress::CompressionMode;
pub use row::{decode_row, encode_row, peek_column_count, ColumnDesc};
